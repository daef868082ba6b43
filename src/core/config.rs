//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::observation::DEFAULT_RETRY_HINT_HEADER;
use crate::classify::spike::DEFAULT_ADMISSIBLE_STATUSES;
use crate::core::errors::{Result, RlvError};
use crate::core::tier::{Tier, TierTable};
use crate::metrics::latency::{DEFAULT_TREND_STATS, TrendStat, parse_trend_stats};
use crate::metrics::scorer::{
    AccuracyScorer, DEFAULT_PASS_THRESHOLD_PCT, DEFAULT_TOLERANCE_REQUESTS, TolerancePolicy,
};
use crate::profile::stages::{LoadProfile, StageSpec};
use crate::threshold::spec::ThresholdSpec;

/// Full RLV configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tiers: TierTable,
    pub probe: ProbeConfig,
    pub spike: SpikeConfig,
    pub report: ReportConfig,
    pub paths: PathsConfig,
}

/// Quota saturation probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Tier under test; must exist in `[tiers]`.
    pub tier: String,
    /// Requests issued past the quota to verify rejection.
    pub extra_requests: u64,
    pub retry_hint_header: String,
    /// Overall accuracy (percent) that must be strictly exceeded.
    pub pass_accuracy_pct: f64,
    /// Missing admits tolerated by the success-count threshold.
    pub success_tolerance: u64,
    /// Missing throttles tolerated by the rejection-count threshold.
    pub rejection_tolerance: u64,
    /// Unexpected errors must stay strictly below this.
    pub max_unexpected_errors: u64,
    /// Emit a progress event every N requests (0 disables).
    pub progress_every: u64,
    /// Extra thresholds evaluated on top of the built-in count thresholds.
    pub thresholds: Vec<String>,
}

/// Staged spike run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpikeConfig {
    pub stages: Vec<StageSpec>,
    /// Statuses that are acceptable answers under spike load.
    pub admissible_statuses: Vec<u16>,
    /// Evaluated after every spike run. Endpoint trends such as
    /// `user_latency.p(95)<200` exist only for tagged records, so they are
    /// opt-in here rather than defaults.
    pub thresholds: Vec<String>,
}

/// Report rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    /// Summary stats computed for every latency trend.
    pub trend_stats: Vec<String>,
}

/// Filesystem paths used by rlv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tier: "BASIC".to_string(),
            extra_requests: 10,
            retry_hint_header: DEFAULT_RETRY_HINT_HEADER.to_string(),
            pass_accuracy_pct: DEFAULT_PASS_THRESHOLD_PCT,
            success_tolerance: DEFAULT_TOLERANCE_REQUESTS,
            rejection_tolerance: DEFAULT_TOLERANCE_REQUESTS,
            max_unexpected_errors: 5,
            progress_every: 10,
            thresholds: Vec::new(),
        }
    }
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            stages: LoadProfile::default_spike_specs(),
            admissible_statuses: DEFAULT_ADMISSIBLE_STATUSES.to_vec(),
            thresholds: vec![
                "http_req_duration.p(95)<500".to_string(),
                "http_req_failed.rate<0.50".to_string(),
                "errors.rate<0.01".to_string(),
                "recovery_time.seconds<30".to_string(),
            ],
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            trend_stats: DEFAULT_TREND_STATS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[RLV-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("rlv").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("rlv")
                .join("runs.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| RlvError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml(&raw)?
        } else if is_explicit_path {
            return Err(RlvError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML without touching the environment or validating.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for run logs.
    ///
    /// FNV-1a over canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Tier under test, resolved against the tier table.
    pub fn probe_tier(&self) -> Result<Tier> {
        self.tiers.resolve(&self.probe.tier)
    }

    #[must_use]
    pub fn scorer(&self) -> AccuracyScorer {
        AccuracyScorer::new(
            self.probe.pass_accuracy_pct,
            TolerancePolicy {
                success: self.probe.success_tolerance,
                rejection: self.probe.rejection_tolerance,
            },
        )
    }

    pub fn load_profile(&self) -> Result<LoadProfile> {
        LoadProfile::from_specs(&self.spike.stages)
    }

    pub fn trend_stats(&self) -> Result<Vec<TrendStat>> {
        parse_trend_stats(&self.report.trend_stats)
    }

    pub fn probe_thresholds(&self) -> Result<Vec<ThresholdSpec>> {
        ThresholdSpec::parse_all(&self.probe.thresholds)
    }

    pub fn spike_thresholds(&self) -> Result<Vec<ThresholdSpec>> {
        ThresholdSpec::parse_all(&self.spike.thresholds)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RLV_PROBE_TIER") {
            self.probe.tier = raw;
        }
        set_u64(&mut lookup, "RLV_PROBE_EXTRA_REQUESTS", &mut self.probe.extra_requests)?;
        if let Some(raw) = lookup("RLV_PROBE_RETRY_HINT_HEADER") {
            self.probe.retry_hint_header = raw;
        }
        set_f64(
            &mut lookup,
            "RLV_PROBE_PASS_ACCURACY_PCT",
            &mut self.probe.pass_accuracy_pct,
        )?;
        set_u64(
            &mut lookup,
            "RLV_PROBE_SUCCESS_TOLERANCE",
            &mut self.probe.success_tolerance,
        )?;
        set_u64(
            &mut lookup,
            "RLV_PROBE_REJECTION_TOLERANCE",
            &mut self.probe.rejection_tolerance,
        )?;
        set_u64(
            &mut lookup,
            "RLV_PROBE_MAX_UNEXPECTED_ERRORS",
            &mut self.probe.max_unexpected_errors,
        )?;
        set_u64(
            &mut lookup,
            "RLV_PROBE_PROGRESS_EVERY",
            &mut self.probe.progress_every,
        )?;
        if let Some(raw) = lookup("RLV_PATHS_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.tiers.validate()?;
        let tier = self.probe_tier()?;

        if self.probe.extra_requests == 0 {
            return Err(RlvError::NoRejectionWindow {
                quota: tier.quota,
                total_requests: tier.quota,
            });
        }
        if !(0.0..=100.0).contains(&self.probe.pass_accuracy_pct) {
            return Err(RlvError::InvalidConfig {
                details: format!(
                    "probe.pass_accuracy_pct must be in [0, 100], got {}",
                    self.probe.pass_accuracy_pct
                ),
            });
        }
        if self.probe.retry_hint_header.trim().is_empty() {
            return Err(RlvError::InvalidConfig {
                details: "probe.retry_hint_header must not be empty".to_string(),
            });
        }
        self.probe_thresholds()?;

        self.load_profile()?;
        if self.spike.admissible_statuses.is_empty() {
            return Err(RlvError::InvalidConfig {
                details: "spike.admissible_statuses must list at least one status".to_string(),
            });
        }
        if let Some(bad) = self
            .spike
            .admissible_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(RlvError::InvalidConfig {
                details: format!("spike.admissible_statuses contains non-HTTP status {bad}"),
            });
        }
        self.spike_thresholds()?;

        if self.trend_stats()?.is_empty() {
            return Err(RlvError::InvalidConfig {
                details: "report.trend_stats must name at least one stat".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<u64>().map_err(|error| RlvError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_f64<F>(lookup: &mut F, name: &str, slot: &mut f64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<f64>().map_err(|error| RlvError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
