//! Latency trends with k6-style summary statistics.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RlvError};

/// Summary stats reported when nothing else is configured.
pub const DEFAULT_TREND_STATS: [&str; 7] = ["min", "med", "avg", "p(90)", "p(95)", "p(99)", "max"];

/// One summary statistic over a trend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TrendStat {
    /// Smallest sample.
    Min,
    /// Median, same as `p(50)`.
    Med,
    /// Arithmetic mean.
    Avg,
    /// Largest sample.
    Max,
    /// Number of samples.
    Count,
    /// Percentile in `(0, 100]`.
    Percentile(f64),
}

impl FromStr for TrendStat {
    type Err = RlvError;

    fn from_str(raw: &str) -> Result<Self> {
        let s = raw.trim();
        let invalid = |details: &str| RlvError::InvalidConfig {
            details: format!("trend stat {s:?}: {details}"),
        };
        match s {
            "min" => Ok(Self::Min),
            "med" => Ok(Self::Med),
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| invalid("expected min, med, avg, max, count or p(N)"))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| invalid("percentile is not a number"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(invalid("percentile must be in (0, 100]"));
                }
                Ok(Self::Percentile(p))
            }
        }
    }
}

impl TryFrom<String> for TrendStat {
    type Error = RlvError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TrendStat> for String {
    fn from(value: TrendStat) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TrendStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => write!(f, "min"),
            Self::Med => write!(f, "med"),
            Self::Avg => write!(f, "avg"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::Percentile(p) if p.fract() == 0.0 => write!(f, "p({})", *p as u64),
            Self::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

/// Parse a list of stat names, e.g. from config.
pub fn parse_trend_stats<S: AsRef<str>>(names: &[S]) -> Result<Vec<TrendStat>> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// Raw latency samples in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyRecorder {
    samples: Vec<f64>,
}

impl LatencyRecorder {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample. Non-finite values are dropped; negatives clamp to zero.
    pub fn record(&mut self, ms: f64) {
        if ms.is_finite() {
            self.samples.push(ms.max(0.0));
        }
    }

    /// Append every sample of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Samples recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// No samples yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sort a copy of the samples for stat lookups.
    #[must_use]
    pub fn summarize(&self) -> TrendSummary {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        TrendSummary { sorted }
    }
}

/// Sorted snapshot of a trend; every stat of an empty trend is `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSummary {
    sorted: Vec<f64>,
}

impl TrendSummary {
    /// Samples summarized.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sorted.len()
    }

    /// Value of one summary statistic.
    #[must_use]
    pub fn stat(&self, stat: TrendStat) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        match stat {
            TrendStat::Min => self.sorted[0],
            TrendStat::Max => self.sorted[self.sorted.len() - 1],
            TrendStat::Avg => self.sorted.iter().sum::<f64>() / self.sorted.len() as f64,
            TrendStat::Med => self.percentile(50.0),
            TrendStat::Count => self.sorted.len() as f64,
            TrendStat::Percentile(p) => self.percentile(p),
        }
    }

    /// Linear interpolation between closest ranks.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        let rank = (p.clamp(0.0, 100.0) / 100.0) * (self.sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        (self.sorted[hi] - self.sorted[lo]).mul_add(frac, self.sorted[lo])
    }
}
