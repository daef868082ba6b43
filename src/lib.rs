#![forbid(unsafe_code)]

//! Rate-limit verdict engine (rlv): turns the raw request records of a
//! rate-limit load test into a verdict.
//!
//! Two run shapes:
//! 1. **Quota probe**: one actor crosses a tier's quota; every request is
//!    predicted (admit/reject), classified, and folded into confusion counts
//!    that are scored for boundary-enforcement accuracy
//! 2. **Spike run**: staged concurrency spike; throttling counts as graceful
//!    degradation, and thresholds gate latency, error rate and recovery
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use ratelimit_verdict::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use ratelimit_verdict::core::config::Config;
//! use ratelimit_verdict::run::probe::{ProbeOptions, QuotaProbe};
//! ```

pub mod prelude;

pub mod classify;
pub mod core;
pub mod logger;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod run;
pub mod threshold;
