//! Phase classifier: expected outcome of a request from its sequence index.

use std::fmt;

use serde::Serialize;

/// What the service should do with a request, given the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpectedOutcome {
    /// Within the quota window; the request should be served.
    Admit,
    /// Past the quota; admission control should reject it.
    Reject,
}

impl fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admit => write!(f, "ADMIT"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// Expected outcome for the `index`-th request (1-based) against `quota`.
///
/// The boundary request `index == quota` is still admitted; `quota + 1` is the
/// first request that must be rejected.
#[must_use]
pub const fn classify_expectation(index: u64, quota: u64) -> ExpectedOutcome {
    if index <= quota {
        ExpectedOutcome::Admit
    } else {
        ExpectedOutcome::Reject
    }
}

/// Number of requests expected to be rejected out of `total_requests`.
#[must_use]
pub const fn expected_rejections(quota: u64, total_requests: u64) -> u64 {
    total_requests.saturating_sub(quota)
}
