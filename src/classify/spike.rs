//! Spike-mode classification.
//!
//! Under a load spike, throttling is the *desired* degradation and a 404 is a
//! valid business answer, so neither is an error. Two pure functions look at
//! the same record independently:
//! - [`SpikeClassifier::classify`] separates admission-control rejections from genuine errors
//! - [`is_http_failure`] is the plain transport view, where a 429 *does* count as failed

use std::collections::BTreeSet;

use serde::Serialize;

use crate::classify::observation::{STATUS_NOT_FOUND, STATUS_OK, STATUS_TOO_MANY_REQUESTS};
use crate::core::record::RequestRecord;

/// Statuses admissible during a spike unless configured otherwise.
pub const DEFAULT_ADMISSIBLE_STATUSES: [u16; 3] = [STATUS_OK, STATUS_NOT_FOUND, STATUS_TOO_MANY_REQUESTS];

/// Outcome of one request under a spike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpikeOutcome {
    /// Served normally.
    Admitted,
    /// Valid "not found" business response.
    NotFound,
    /// Rejected by admission control.
    Throttled,
    /// Anything the service should not have produced.
    GenuineError,
}

impl SpikeOutcome {
    /// Whether the record participates in the error rate. Throttled responses
    /// are excluded entirely rather than counted as passes.
    #[must_use]
    pub fn in_error_rate(self) -> bool {
        self != Self::Throttled
    }

    /// Counts toward `errors.rate`.
    #[must_use]
    pub fn is_genuine_error(self) -> bool {
        self == Self::GenuineError
    }
}

/// Spike-mode classifier over a configurable admissible status set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpikeClassifier {
    admissible: BTreeSet<u16>,
}

impl Default for SpikeClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ADMISSIBLE_STATUSES)
    }
}

impl SpikeClassifier {
    /// Classifier admitting exactly the given statuses.
    #[must_use]
    pub fn new(admissible: impl IntoIterator<Item = u16>) -> Self {
        Self {
            admissible: admissible.into_iter().collect(),
        }
    }

    /// The admissible status set.
    #[must_use]
    pub fn admissible(&self) -> &BTreeSet<u16> {
        &self.admissible
    }

    /// Statuses outside the admissible set and contentless `200`s are genuine errors.
    #[must_use]
    pub fn classify(&self, record: &RequestRecord) -> SpikeOutcome {
        if !self.admissible.contains(&record.status) {
            return SpikeOutcome::GenuineError;
        }
        match record.status {
            STATUS_OK if !record.body.content => SpikeOutcome::GenuineError,
            STATUS_NOT_FOUND => SpikeOutcome::NotFound,
            STATUS_TOO_MANY_REQUESTS => SpikeOutcome::Throttled,
            _ => SpikeOutcome::Admitted,
        }
    }
}

/// Classify with the default admissible set `{200, 404, 429}`.
#[must_use]
pub fn classify_spike(record: &RequestRecord) -> SpikeOutcome {
    SpikeClassifier::default().classify(record)
}

/// Transport-level failure: any status outside `200..=399`, throttling included.
#[must_use]
pub fn is_http_failure(status: u16) -> bool {
    !(200..=399).contains(&status)
}
