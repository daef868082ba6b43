//! Outcome classifier for quota probes.
//!
//! Rules, first match wins:
//! 1. `200` with the content field → [`ObservedOutcome::Success`]
//! 2. `429` with a retry hint header and an error field → [`ObservedOutcome::Throttled`]
//! 3. `429` missing either → [`ObservedOutcome::UnexpectedError`]
//! 4. `200` without the content field → [`ObservedOutcome::UnexpectedError`]
//! 5. any other status → [`ObservedOutcome::UnexpectedError`]

use std::fmt;

use serde::Serialize;

use crate::core::record::{BodyFlags, Headers, RequestRecord};

/// Default name of the retry hint header on throttled responses.
pub const DEFAULT_RETRY_HINT_HEADER: &str = "Retry-After";

/// Served with content.
pub const STATUS_OK: u16 = 200;
/// Not found; a valid business answer during a spike.
pub const STATUS_NOT_FOUND: u16 = 404;
/// Admission-control rejection.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// What a response actually was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservedOutcome {
    /// `200` carrying the expected content.
    Success,
    /// Well-formed admission-control rejection.
    Throttled {
        /// Value of the retry hint header.
        retry_hint: String,
    },
    /// Anything else, including malformed success or throttle responses.
    UnexpectedError,
}

impl ObservedOutcome {
    /// Upper-case label used in logs and reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Throttled { .. } => "THROTTLED",
            Self::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Whether this is a well-formed throttle.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

impl fmt::Display for ObservedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Quota-mode classifier; carries the retry hint header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeClassifier {
    retry_hint_header: String,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_HINT_HEADER)
    }
}

impl OutcomeClassifier {
    /// Classifier that looks for `retry_hint_header` (any case) on 429s.
    #[must_use]
    pub fn new(retry_hint_header: &str) -> Self {
        Self {
            retry_hint_header: retry_hint_header.to_string(),
        }
    }

    /// Header name this classifier requires on throttles.
    #[must_use]
    pub fn retry_hint_header(&self) -> &str {
        &self.retry_hint_header
    }

    /// Apply the rules in module order; the first match wins.
    #[must_use]
    pub fn classify(&self, status: u16, headers: &Headers, body: BodyFlags) -> ObservedOutcome {
        match status {
            STATUS_OK if body.content => ObservedOutcome::Success,
            STATUS_TOO_MANY_REQUESTS if body.error => headers
                .get(&self.retry_hint_header)
                .map_or(ObservedOutcome::UnexpectedError, |hint| {
                    ObservedOutcome::Throttled {
                        retry_hint: hint.to_string(),
                    }
                }),
            _ => ObservedOutcome::UnexpectedError,
        }
    }

    /// [`Self::classify`] over a record's status, headers and body.
    #[must_use]
    pub fn classify_record(&self, record: &RequestRecord) -> ObservedOutcome {
        self.classify(record.status, &record.headers, record.body)
    }
}

/// Classify with the default `Retry-After` header name.
#[must_use]
pub fn classify_observation(status: u16, headers: &Headers, body: BodyFlags) -> ObservedOutcome {
    OutcomeClassifier::default().classify(status, headers, body)
}
