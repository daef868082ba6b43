//! Run drivers: fold request records through the classifiers, aggregate, score
//! and evaluate thresholds.
//!
//! - [`probe::QuotaProbe`]: sequential saturation probe across a tier quota
//! - [`spike::SpikeRun`]: staged concurrency spike, foldable from many threads

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

pub mod probe;
pub mod spike;

use crate::logger::run_log::{RunEvent, RunLoggerHandle};
use crate::metrics::latency::{TrendStat, TrendSummary};
use crate::threshold::evaluator::{MetricSet, ThresholdOutcome, metric_key};
use crate::threshold::spec::ThresholdSpec;

/// Configured stats plus any stat a threshold asks of trend `name`.
pub(crate) fn stats_for(name: &str, configured: &[TrendStat], specs: &[ThresholdSpec]) -> Vec<TrendStat> {
    let mut stats = configured.to_vec();
    let prefix = format!("{name}.");
    for spec in specs {
        if let Some(raw) = spec.metric.strip_prefix(&prefix)
            && let Ok(stat) = raw.parse::<TrendStat>()
            && !stats.contains(&stat)
        {
            stats.push(stat);
        }
    }
    stats
}

pub(crate) fn insert_trend(metrics: &mut MetricSet, name: &str, summary: &TrendSummary, stats: &[TrendStat]) {
    for stat in stats {
        metrics.insert(metric_key(name, &stat.to_string()), summary.stat(*stat));
    }
}

/// `numerator / denominator`, or 0 for an empty denominator.
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

pub(crate) fn log_failures(logger: Option<&RunLoggerHandle>, outcome: &ThresholdOutcome) {
    let Some(logger) = logger else {
        return;
    };
    for failure in outcome.failures() {
        logger.send(RunEvent::ThresholdFailed {
            threshold: failure.spec.to_string(),
            observed: failure.observed,
        });
    }
}
