//! Confusion counts: expected-vs-observed tallies for a quota probe.
//!
//! Folding is purely additive, so the result never depends on the order
//! records arrive in. Partial tallies built by separate actors combine with
//! [`ConfusionCounts::merge`]; a single tally shared across threads uses
//! [`SharedConfusionCounts`], one atomic counter per bucket.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::classify::expectation::ExpectedOutcome;
use crate::classify::observation::ObservedOutcome;

/// The bucket a single record lands in. Every `(expected, observed)` pairing
/// maps to exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Admitted inside the quota.
    TrueAdmit,
    /// Throttled inside the quota: enforcement kicked in early.
    FalseThrottle,
    /// Throttled past the quota.
    TrueThrottle,
    /// Served past the quota: enforcement kicked in late or not at all.
    FalseAdmit,
    /// Malformed or unexpected response.
    UnexpectedError,
}

impl Bucket {
    /// Every bucket, in report order.
    pub const ALL: [Self; 5] = [
        Self::TrueAdmit,
        Self::FalseThrottle,
        Self::TrueThrottle,
        Self::FalseAdmit,
        Self::UnexpectedError,
    ];

    /// Bucket for one classified record.
    #[must_use]
    pub fn of(expected: ExpectedOutcome, observed: &ObservedOutcome) -> Self {
        match (expected, observed) {
            (ExpectedOutcome::Admit, ObservedOutcome::Success) => Self::TrueAdmit,
            (ExpectedOutcome::Admit, ObservedOutcome::Throttled { .. }) => Self::FalseThrottle,
            (ExpectedOutcome::Reject, ObservedOutcome::Throttled { .. }) => Self::TrueThrottle,
            (ExpectedOutcome::Reject, ObservedOutcome::Success) => Self::FalseAdmit,
            (_, ObservedOutcome::UnexpectedError) => Self::UnexpectedError,
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::TrueAdmit => 0,
            Self::FalseThrottle => 1,
            Self::TrueThrottle => 2,
            Self::FalseAdmit => 3,
            Self::UnexpectedError => 4,
        }
    }
}

/// Per-bucket tallies of a quota probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Expected ADMIT, observed SUCCESS.
    pub true_admit: u64,
    /// Expected ADMIT, observed THROTTLED.
    pub false_throttle: u64,
    /// Expected REJECT, observed THROTTLED.
    pub true_throttle: u64,
    /// Expected REJECT, observed SUCCESS.
    pub false_admit: u64,
    /// Observed UNEXPECTED_ERROR, regardless of expectation.
    pub unexpected_error: u64,
}

impl ConfusionCounts {
    /// Fold one classified record in.
    #[must_use]
    pub fn fold(self, expected: ExpectedOutcome, observed: &ObservedOutcome) -> Self {
        self.add(Bucket::of(expected, observed), 1)
    }

    /// Combine two partial tallies. Associative and commutative.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            true_admit: self.true_admit + other.true_admit,
            false_throttle: self.false_throttle + other.false_throttle,
            true_throttle: self.true_throttle + other.true_throttle,
            false_admit: self.false_admit + other.false_admit,
            unexpected_error: self.unexpected_error + other.unexpected_error,
        }
    }

    /// Tally of one bucket.
    #[must_use]
    pub fn get(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::TrueAdmit => self.true_admit,
            Bucket::FalseThrottle => self.false_throttle,
            Bucket::TrueThrottle => self.true_throttle,
            Bucket::FalseAdmit => self.false_admit,
            Bucket::UnexpectedError => self.unexpected_error,
        }
    }

    /// Records folded so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        Bucket::ALL.iter().map(|b| self.get(*b)).sum()
    }

    /// Every observed SUCCESS, whether or not it was expected.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.true_admit + self.false_admit
    }

    /// Every observed THROTTLED, whether or not it was expected.
    #[must_use]
    pub fn throttled(&self) -> u64 {
        self.true_throttle + self.false_throttle
    }

    fn add(mut self, bucket: Bucket, n: u64) -> Self {
        match bucket {
            Bucket::TrueAdmit => self.true_admit += n,
            Bucket::FalseThrottle => self.false_throttle += n,
            Bucket::TrueThrottle => self.true_throttle += n,
            Bucket::FalseAdmit => self.false_admit += n,
            Bucket::UnexpectedError => self.unexpected_error += n,
        }
        self
    }
}

/// Lock-free counterpart of [`ConfusionCounts`] for concurrent folding.
#[derive(Debug, Default)]
pub struct SharedConfusionCounts {
    slots: [AtomicU64; 5],
}

impl SharedConfusionCounts {
    /// All slots at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record: a single atomic increment.
    pub fn fold(&self, expected: ExpectedOutcome, observed: &ObservedOutcome) {
        self.slots[Bucket::of(expected, observed).slot()].fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy. Taken after all folding actors have finished it is exact.
    #[must_use]
    pub fn snapshot(&self) -> ConfusionCounts {
        Bucket::ALL
            .iter()
            .fold(ConfusionCounts::default(), |acc, bucket| {
                acc.add(*bucket, self.slots[bucket.slot()].load(Ordering::Acquire))
            })
    }
}
