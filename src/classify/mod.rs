//! Request classification: what each request should have done, and what it did.
//!
//! Three independent pure classifiers:
//! - [`expectation`]: admit/reject prediction from the request's position against the quota
//! - [`observation`]: quota-probe outcome (success / throttled / unexpected error)
//! - [`spike`]: spike-mode outcome, where 404 and 429 are admissible

pub mod expectation;
pub mod observation;
pub mod spike;
