//! Quota saturation probe.
//!
//! One actor issues `quota + extra_requests` requests back to back inside a
//! single quota window. Each record carries its own 1-based index, so the
//! expectation for a record never depends on arrival order. Concurrent
//! issuance would make "request N" ambiguous and is not supported.

#![allow(missing_docs)]

use serde::Serialize;

use crate::classify::expectation::{ExpectedOutcome, classify_expectation};
use crate::classify::observation::{ObservedOutcome, OutcomeClassifier};
use crate::core::config::Config;
use crate::core::errors::{Result, RlvError};
use crate::core::record::RequestRecord;
use crate::core::tier::Tier;
use crate::logger::run_log::{RunEvent, RunLoggerHandle};
use crate::metrics::confusion::{Bucket, ConfusionCounts};
use crate::metrics::latency::{DEFAULT_TREND_STATS, LatencyRecorder, TrendStat, parse_trend_stats};
use crate::metrics::scorer::{AccuracyReport, AccuracyScorer};
use crate::run::{insert_trend, log_failures, stats_for};
use crate::threshold::evaluator::{MetricSet, ThresholdOutcome, evaluate};
use crate::threshold::spec::{Comparison, ThresholdSpec};

pub const RUN_NAME: &str = "probe";

/// Everything a probe needs besides the tier.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub extra_requests: u64,
    pub retry_hint_header: String,
    pub max_unexpected_errors: u64,
    /// Progress event every N records; 0 disables.
    pub progress_every: u64,
    /// Evaluated after the built-in count thresholds.
    pub extra_thresholds: Vec<ThresholdSpec>,
    pub trend_stats: Vec<TrendStat>,
    pub scorer: AccuracyScorer,
}

impl ProbeOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            extra_requests: config.probe.extra_requests,
            retry_hint_header: config.probe.retry_hint_header.clone(),
            max_unexpected_errors: config.probe.max_unexpected_errors,
            progress_every: config.probe.progress_every,
            extra_thresholds: config.probe_thresholds()?,
            trend_stats: config.trend_stats()?,
            scorer: config.scorer(),
        })
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        let defaults = crate::core::config::ProbeConfig::default();
        Self {
            extra_requests: defaults.extra_requests,
            retry_hint_header: defaults.retry_hint_header,
            max_unexpected_errors: defaults.max_unexpected_errors,
            progress_every: defaults.progress_every,
            extra_thresholds: Vec::new(),
            trend_stats: parse_trend_stats(&DEFAULT_TREND_STATS).unwrap_or_default(),
            scorer: AccuracyScorer::default(),
        }
    }
}

/// Final result of a probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub planned_requests: u64,
    pub accuracy: AccuracyReport,
    /// Lowest index observed throttled, anywhere in the run.
    pub first_throttle_index: Option<u64>,
    /// `first_throttle_index - (quota + 1)`: negative means early enforcement.
    pub boundary_offset: Option<i64>,
    pub metrics: MetricSet,
    pub thresholds: ThresholdOutcome,
    /// Strict accuracy verdict AND every threshold.
    pub passed: bool,
}

pub struct QuotaProbe {
    tier: Tier,
    options: ProbeOptions,
    classifier: OutcomeClassifier,
    counts: ConfusionCounts,
    latency: LatencyRecorder,
    folded: u64,
    max_index: u64,
    first_throttle_index: Option<u64>,
    logger: Option<RunLoggerHandle>,
}

impl QuotaProbe {
    /// Plan a probe; at least one request past the quota is required.
    pub fn new(tier: Tier, options: ProbeOptions) -> Result<Self> {
        if options.extra_requests == 0 {
            return Err(RlvError::NoRejectionWindow {
                quota: tier.quota,
                total_requests: tier.quota,
            });
        }
        Ok(Self {
            classifier: OutcomeClassifier::new(&options.retry_hint_header),
            tier,
            options,
            counts: ConfusionCounts::default(),
            latency: LatencyRecorder::new(),
            folded: 0,
            max_index: 0,
            first_throttle_index: None,
            logger: None,
        })
    }

    #[must_use]
    pub fn with_logger(mut self, logger: RunLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn tier(&self) -> &Tier {
        &self.tier
    }

    #[must_use]
    pub fn planned_requests(&self) -> u64 {
        self.tier.quota.saturating_add(self.options.extra_requests)
    }

    /// Snapshot of the counts folded so far.
    #[must_use]
    pub fn counts(&self) -> ConfusionCounts {
        self.counts
    }

    /// Classify and fold one record.
    pub fn observe(&mut self, record: &RequestRecord) -> (ExpectedOutcome, ObservedOutcome) {
        let quota = self.tier.quota;
        let expected = classify_expectation(record.index, quota);
        let observed = self.classifier.classify_record(record);

        self.counts = self.counts.fold(expected, &observed);
        self.latency.record(record.latency_ms);
        self.folded += 1;
        self.max_index = self.max_index.max(record.index);
        if observed.is_throttled() {
            self.first_throttle_index = Some(
                self.first_throttle_index
                    .map_or(record.index, |seen| seen.min(record.index)),
            );
        }

        if let Some(logger) = &self.logger {
            Self::log_record(logger, quota, self.options.progress_every, record, expected, &observed);
        }
        (expected, observed)
    }

    fn log_record(
        logger: &RunLoggerHandle,
        quota: u64,
        progress_every: u64,
        record: &RequestRecord,
        expected: ExpectedOutcome,
        observed: &ObservedOutcome,
    ) {
        let index = record.index;
        if progress_every > 0 && index % progress_every == 0 {
            logger.send(RunEvent::Progress {
                index,
                status: record.status,
                outcome: observed.label().to_string(),
            });
        }
        match Bucket::of(expected, observed) {
            Bucket::FalseThrottle => logger.send(RunEvent::EarlyThrottle { index, quota }),
            Bucket::FalseAdmit => logger.send(RunEvent::LateAdmit { index, quota }),
            Bucket::UnexpectedError => logger.send(RunEvent::UnexpectedStatus {
                index,
                status: record.status,
            }),
            Bucket::TrueThrottle if index == quota + 1 => {
                logger.send(RunEvent::BoundaryEnforced { index, quota });
            }
            Bucket::TrueAdmit | Bucket::TrueThrottle => {}
        }
    }

    /// Requests actually issued: the highest index seen, or the fold count if
    /// records repeat an index.
    #[must_use]
    pub fn issued_requests(&self) -> u64 {
        self.max_index.max(self.folded)
    }

    /// Built-in count thresholds for this probe.
    fn count_thresholds(&self, accuracy: &AccuracyReport) -> Result<Vec<ThresholdSpec>> {
        #[allow(clippy::cast_precision_loss)]
        let bound = |n: u64| n as f64;
        Ok(vec![
            ThresholdSpec::new(
                "successful_requests.count",
                Comparison::Ge,
                bound(accuracy.tolerance.min_success_count),
            )?,
            ThresholdSpec::new(
                "rate_limited_requests.count",
                Comparison::Ge,
                bound(accuracy.tolerance.min_rejection_count),
            )?,
            ThresholdSpec::new(
                "unexpected_errors.count",
                Comparison::Lt,
                bound(self.options.max_unexpected_errors),
            )?,
        ])
    }

    /// Score and evaluate. Works on partial runs as long as at least one
    /// request past the quota was issued.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn finish(self) -> Result<ProbeReport> {
        let total = self.issued_requests();
        let accuracy = self.options.scorer.score(&self.tier, &self.counts, total)?;

        let mut specs = self.count_thresholds(&accuracy)?;
        specs.extend(self.options.extra_thresholds.iter().cloned());

        let mut metrics = MetricSet::new();
        let counts = &self.counts;
        metrics.insert("http_reqs.count".to_string(), total as f64);
        metrics.insert("successful_requests.count".to_string(), counts.successes() as f64);
        metrics.insert("rate_limited_requests.count".to_string(), counts.throttled() as f64);
        metrics.insert("unexpected_errors.count".to_string(), counts.unexpected_error as f64);
        metrics.insert("false_throttles.count".to_string(), counts.false_throttle as f64);
        metrics.insert("false_admits.count".to_string(), counts.false_admit as f64);
        metrics.insert("accuracy.success".to_string(), accuracy.success_accuracy);
        metrics.insert("accuracy.rejection".to_string(), accuracy.rejection_accuracy);
        metrics.insert("accuracy.overall".to_string(), accuracy.overall_accuracy);
        let stats = stats_for("http_req_duration", &self.options.trend_stats, &specs);
        insert_trend(&mut metrics, "http_req_duration", &self.latency.summarize(), &stats);

        let thresholds = evaluate(&metrics, &specs)?;
        log_failures(self.logger.as_ref(), &thresholds);

        let passed = accuracy.passed && thresholds.overall_pass;
        if let Some(logger) = &self.logger {
            logger.send(RunEvent::RunCompleted {
                run: RUN_NAME,
                total_requests: total,
                accuracy: Some(accuracy.overall_accuracy),
                passed,
            });
        }

        let boundary = self.tier.quota + 1;
        Ok(ProbeReport {
            planned_requests: self.planned_requests(),
            first_throttle_index: self.first_throttle_index,
            boundary_offset: self
                .first_throttle_index
                .map(|i| i as i64 - boundary as i64),
            accuracy,
            metrics,
            thresholds,
            passed,
        })
    }
}
