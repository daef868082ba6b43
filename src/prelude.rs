//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use ratelimit_verdict::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, RlvError};
pub use crate::core::record::{BodyFlags, Headers, RequestRecord, parse_records, read_records};
pub use crate::core::tier::{Tier, TierId, TierTable};

// Classification
pub use crate::classify::expectation::{ExpectedOutcome, classify_expectation};
pub use crate::classify::observation::{ObservedOutcome, OutcomeClassifier, classify_observation};
pub use crate::classify::spike::{SpikeClassifier, SpikeOutcome, classify_spike};

// Metrics
pub use crate::metrics::confusion::{Bucket, ConfusionCounts, SharedConfusionCounts};
pub use crate::metrics::latency::{LatencyRecorder, TrendStat};
pub use crate::metrics::scorer::{AccuracyReport, AccuracyScorer, TolerancePolicy};

// Profiles and thresholds
pub use crate::profile::stages::{LoadProfile, LoadStage, StagePhase};
pub use crate::threshold::evaluator::{MetricSet, ThresholdEvaluation, ThresholdOutcome, evaluate};
pub use crate::threshold::spec::{Comparison, ThresholdSpec};

// Runs and reports
pub use crate::report::ToFields;
pub use crate::run::probe::{ProbeOptions, ProbeReport, QuotaProbe};
pub use crate::run::spike::{SpikeOptions, SpikeReport, SpikeRun};
