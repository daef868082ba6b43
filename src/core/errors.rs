//! RLV-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RlvError>;

/// Top-level error type for the verdict engine.
///
/// Codes in the 1xxx range are configuration errors and abort a run before
/// any record is classified. Malformed observations are never errors; they are
/// counted as unexpected outcomes instead.
#[derive(Debug, Error)]
pub enum RlvError {
    #[error("[RLV-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RLV-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RLV-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RLV-1101] unknown tier {name:?}")]
    UnknownTier { name: String },

    #[error("[RLV-1201] invalid threshold {expression:?}: {details}")]
    InvalidThreshold { expression: String, details: String },

    #[error("[RLV-1301] invalid load profile: {details}")]
    InvalidProfile { details: String },

    #[error(
        "[RLV-1401] rejection accuracy needs requests beyond the quota: quota={quota}, total_requests={total_requests}"
    )]
    NoRejectionWindow { quota: u64, total_requests: u64 },

    #[error("[RLV-2001] threshold references metric {metric:?} which the run never produced")]
    MetricReference { metric: String },

    #[error("[RLV-2101] malformed request record at line {line}: {details}")]
    RecordParse { line: usize, details: String },

    #[error("[RLV-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RLV-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RLV-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RlvError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RLV-1001",
            Self::MissingConfig { .. } => "RLV-1002",
            Self::ConfigParse { .. } => "RLV-1003",
            Self::UnknownTier { .. } => "RLV-1101",
            Self::InvalidThreshold { .. } => "RLV-1201",
            Self::InvalidProfile { .. } => "RLV-1301",
            Self::NoRejectionWindow { .. } => "RLV-1401",
            Self::MetricReference { .. } => "RLV-2001",
            Self::RecordParse { .. } => "RLV-2101",
            Self::Serialization { .. } => "RLV-2102",
            Self::Io { .. } => "RLV-3002",
            Self::Runtime { .. } => "RLV-3900",
        }
    }

    /// Whether the error is a configuration problem detected before or instead
    /// of classification.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::UnknownTier { .. }
                | Self::InvalidThreshold { .. }
                | Self::InvalidProfile { .. }
                | Self::NoRejectionWindow { .. }
                | Self::MetricReference { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for RlvError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RlvError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_variant() -> Vec<RlvError> {
        vec![
            RlvError::InvalidConfig {
                details: String::new(),
            },
            RlvError::MissingConfig {
                path: PathBuf::new(),
            },
            RlvError::ConfigParse {
                context: "",
                details: String::new(),
            },
            RlvError::UnknownTier {
                name: String::new(),
            },
            RlvError::InvalidThreshold {
                expression: String::new(),
                details: String::new(),
            },
            RlvError::InvalidProfile {
                details: String::new(),
            },
            RlvError::NoRejectionWindow {
                quota: 60,
                total_requests: 60,
            },
            RlvError::MetricReference {
                metric: String::new(),
            },
            RlvError::RecordParse {
                line: 1,
                details: String::new(),
            },
            RlvError::Serialization {
                context: "",
                details: String::new(),
            },
            RlvError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            RlvError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = every_variant();
        let codes: Vec<&str> = errors.iter().map(RlvError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_carries_the_code() {
        for err in every_variant() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain {}: {msg}",
                err.code()
            );
        }
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(
            RlvError::UnknownTier {
                name: "GOLD".to_string()
            }
            .is_configuration()
        );
        assert!(
            RlvError::NoRejectionWindow {
                quota: 60,
                total_requests: 60
            }
            .is_configuration()
        );
        assert!(
            RlvError::MetricReference {
                metric: "errors.rate".to_string()
            }
            .is_configuration()
        );
        assert!(
            !RlvError::Runtime {
                details: String::new()
            }
            .is_configuration()
        );
        assert!(
            !RlvError::RecordParse {
                line: 3,
                details: String::new()
            }
            .is_configuration()
        );
    }

    #[test]
    fn no_rejection_window_message_names_both_counts() {
        let msg = RlvError::NoRejectionWindow {
            quota: 60,
            total_requests: 60,
        }
        .to_string();
        assert!(msg.contains("quota=60"), "{msg}");
        assert!(msg.contains("total_requests=60"), "{msg}");
    }

    #[test]
    fn io_convenience_constructor() {
        let err = RlvError::io(
            "/tmp/records.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "RLV-3002");
        assert!(err.to_string().contains("/tmp/records.jsonl"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: RlvError = json_err.into();
        assert_eq!(err.code(), "RLV-2102");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: RlvError = toml_err.into();
        assert_eq!(err.code(), "RLV-1003");
    }
}
