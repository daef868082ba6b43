//! Request records: one immutable observation per issued request.
//!
//! Records are produced by the external transport and arrive as JSON lines:
//!
//! ```json
//! {"index":61,"timestamp":"2026-01-01T00:00:01.250Z","status":429,
//!  "headers":{"Retry-After":"59"},"body":{"content":false,"error":true},
//!  "latency_ms":3.2,"endpoint":"users"}
//! ```

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RlvError};

/// Response headers as observed. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Value of the first header whose name matches `name` ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

/// What body inspection found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyFlags {
    /// The expected content field (`content`) was present.
    pub content: bool,
    /// A structured error field (`error`) was present.
    pub error: bool,
}

impl BodyFlags {
    #[must_use]
    pub const fn content() -> Self {
        Self {
            content: true,
            error: false,
        }
    }

    #[must_use]
    pub const fn error() -> Self {
        Self {
            content: false,
            error: true,
        }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self {
            content: false,
            error: false,
        }
    }
}

/// One issued request and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// 1-based sequence index, monotonic within a run.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// HTTP status; 0 when the transport got no response at all.
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: BodyFlags,
    pub latency_ms: f64,
    /// Optional endpoint tag (e.g. `products`) used for per-endpoint latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl RequestRecord {
    /// Latency as a `Duration`; negative or non-finite values clamp to zero.
    #[must_use]
    pub fn latency(&self) -> Duration {
        if self.latency_ms.is_finite() && self.latency_ms > 0.0 {
            Duration::from_secs_f64(self.latency_ms / 1_000.0)
        } else {
            Duration::ZERO
        }
    }

    /// Time elapsed between `start` and this record; zero if the record predates it.
    #[must_use]
    pub fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.timestamp - start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Parse JSONL text into records. Blank lines are skipped; a malformed line
/// is reported with its 1-based line number.
pub fn parse_records(raw: &str) -> Result<Vec<RequestRecord>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let record = serde_json::from_str::<RequestRecord>(line).map_err(|error| {
                RlvError::RecordParse {
                    line: idx + 1,
                    details: error.to_string(),
                }
            })?;
            if record.index == 0 {
                return Err(RlvError::RecordParse {
                    line: idx + 1,
                    details: "index is 1-based, got 0".to_string(),
                });
            }
            Ok(record)
        })
        .collect()
}

/// Read a JSONL records file.
pub fn read_records(path: &Path) -> Result<Vec<RequestRecord>> {
    let raw = fs::read_to_string(path).map_err(|source| RlvError::io(path, source))?;
    parse_records(&raw)
}

/// Earliest timestamp among `records`, used as the spike run start.
#[must_use]
pub fn earliest_timestamp(records: &[RequestRecord]) -> Option<DateTime<Utc>> {
    records.iter().map(|r| r.timestamp).min()
}
