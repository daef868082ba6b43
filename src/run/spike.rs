//! Staged spike run.
//!
//! Records are tagged with the profile phase active at their timestamp
//! (relative to the run start) and classified in spike mode. `observe` takes
//! `&self` and is safe to call from any number of worker threads: tallies are
//! atomics, latency samples sit behind a `parking_lot` mutex.
//!
//! Recovery is the time from the end of the spike stage to the last throttle
//! or genuine error observed after it.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::classify::spike::{SpikeClassifier, SpikeOutcome, is_http_failure};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::record::RequestRecord;
use crate::logger::run_log::{RunEvent, RunLoggerHandle};
use crate::metrics::latency::{DEFAULT_TREND_STATS, LatencyRecorder, TrendStat, parse_trend_stats};
use crate::profile::stages::{LoadProfile, StagePhase};
use crate::run::{insert_trend, log_failures, ratio, stats_for};
use crate::threshold::evaluator::{MetricSet, ThresholdOutcome, evaluate};
use crate::threshold::spec::ThresholdSpec;

pub const RUN_NAME: &str = "spike";

/// Label for records arriving after the last stage has ended.
pub const OVERTIME_LABEL: &str = "overtime";

const OVERALL_TREND: &str = "http_req_duration";

#[derive(Debug, Clone)]
pub struct SpikeOptions {
    pub classifier: SpikeClassifier,
    pub thresholds: Vec<ThresholdSpec>,
    pub trend_stats: Vec<TrendStat>,
}

impl SpikeOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            classifier: SpikeClassifier::new(config.spike.admissible_statuses.iter().copied()),
            thresholds: config.spike_thresholds()?,
            trend_stats: config.trend_stats()?,
        })
    }
}

impl Default for SpikeOptions {
    fn default() -> Self {
        let defaults = crate::core::config::SpikeConfig::default();
        Self {
            classifier: SpikeClassifier::default(),
            thresholds: ThresholdSpec::parse_all(&defaults.thresholds).unwrap_or_default(),
            trend_stats: parse_trend_stats(&DEFAULT_TREND_STATS).unwrap_or_default(),
        }
    }
}

/// Outcome counts for a slice of the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpikeTally {
    pub requests: u64,
    pub admitted: u64,
    pub not_found: u64,
    pub throttled: u64,
    pub genuine_errors: u64,
    /// Transport view: every status outside 2xx/3xx, throttles included.
    pub http_failed: u64,
}

impl SpikeTally {
    /// Genuine errors over every record that is not a throttle.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        ratio(self.genuine_errors, self.requests - self.throttled)
    }

    #[must_use]
    pub fn http_failed_rate(&self) -> f64 {
        ratio(self.http_failed, self.requests)
    }
}

#[derive(Debug, Default)]
struct AtomicTally {
    requests: AtomicU64,
    admitted: AtomicU64,
    not_found: AtomicU64,
    throttled: AtomicU64,
    genuine_errors: AtomicU64,
    http_failed: AtomicU64,
}

impl AtomicTally {
    fn add(&self, outcome: SpikeOutcome, http_failed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let slot = match outcome {
            SpikeOutcome::Admitted => &self.admitted,
            SpikeOutcome::NotFound => &self.not_found,
            SpikeOutcome::Throttled => &self.throttled,
            SpikeOutcome::GenuineError => &self.genuine_errors,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        if http_failed {
            self.http_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> SpikeTally {
        SpikeTally {
            requests: self.requests.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            genuine_errors: self.genuine_errors.load(Ordering::Relaxed),
            http_failed: self.http_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub tally: SpikeTally,
    pub error_rate: f64,
}

/// Final result of a spike run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeReport {
    pub total: SpikeTally,
    /// Phases in profile order, then overtime if anything arrived late.
    pub phases: Vec<PhaseSummary>,
    /// `None` when the profile has no spike stage.
    pub spike_window_secs: Option<(f64, f64)>,
    pub recovery_time_secs: f64,
    /// 1-based stage numbers whose target repeats the previous stage.
    pub no_op_stages: Vec<usize>,
    pub metrics: MetricSet,
    pub thresholds: ThresholdOutcome,
    pub passed: bool,
}

pub struct SpikeRun {
    profile: LoadProfile,
    start: DateTime<Utc>,
    options: SpikeOptions,
    spike_end: Option<Duration>,
    total: AtomicTally,
    /// One slot per `StagePhase::ALL` entry plus overtime.
    phases: [AtomicTally; 6],
    stages_entered: Vec<AtomicBool>,
    /// Milliseconds past spike end of the last disruption, plus one; 0 = none.
    last_disruption: AtomicU64,
    latency: Mutex<LatencyRecorder>,
    endpoint_latency: Mutex<BTreeMap<String, LatencyRecorder>>,
    logger: Option<RunLoggerHandle>,
}

impl SpikeRun {
    #[must_use]
    pub fn new(profile: LoadProfile, start: DateTime<Utc>, options: SpikeOptions) -> Self {
        let spike_end = profile.spike_window().map(|(_, end)| end);
        let stages_entered = profile.stages().iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            profile,
            start,
            options,
            spike_end,
            total: AtomicTally::default(),
            phases: Default::default(),
            stages_entered,
            last_disruption: AtomicU64::new(0),
            latency: Mutex::new(LatencyRecorder::new()),
            endpoint_latency: Mutex::new(BTreeMap::new()),
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: RunLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    /// Phase label for `elapsed`: a stage phase, or overtime past the end.
    #[must_use]
    pub fn phase_label(&self, elapsed: Duration) -> &'static str {
        self.profile
            .phase_at(elapsed)
            .map_or(OVERTIME_LABEL, StagePhase::as_str)
    }

    /// Classify and fold one record. Callable concurrently.
    pub fn observe(&self, record: &RequestRecord) -> SpikeOutcome {
        let elapsed = record.elapsed_since(self.start);
        let outcome = self.options.classifier.classify(record);
        let http_failed = is_http_failure(record.status);

        self.total.add(outcome, http_failed);
        let stage = self.profile.stage_at(elapsed).map(|(i, _)| i);
        self.phases[self.phase_slot(stage)].add(outcome, http_failed);

        if let Some(index) = stage {
            self.note_stage_entered(index, elapsed);
        }
        if let Some(end) = self.spike_end
            && elapsed >= end
            && matches!(outcome, SpikeOutcome::Throttled | SpikeOutcome::GenuineError)
        {
            let past = u64::try_from((elapsed - end).as_millis()).unwrap_or(u64::MAX - 1);
            self.last_disruption.fetch_max(past + 1, Ordering::Relaxed);
        }

        self.latency.lock().record(record.latency_ms);
        if let Some(endpoint) = &record.endpoint {
            self.endpoint_latency
                .lock()
                .entry(trend_name(endpoint))
                .or_default()
                .record(record.latency_ms);
        }
        outcome
    }

    fn phase_slot(&self, stage: Option<usize>) -> usize {
        stage
            .and_then(|i| self.profile.phase_of(i))
            .and_then(|phase| StagePhase::ALL.iter().position(|p| *p == phase))
            .unwrap_or(StagePhase::ALL.len())
    }

    fn note_stage_entered(&self, index: usize, elapsed: Duration) {
        let Some(logger) = &self.logger else {
            return;
        };
        if self.stages_entered[index].swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(phase) = self.profile.phase_of(index) {
            logger.send(RunEvent::PhaseEntered {
                phase: phase.to_string(),
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                target: self.profile.stages()[index].target,
            });
        }
    }

    #[must_use]
    pub fn recovery_time(&self) -> Duration {
        match self.last_disruption.load(Ordering::Relaxed) {
            0 => Duration::ZERO,
            v => Duration::from_millis(v - 1),
        }
    }

    /// Snapshot every tally and evaluate thresholds.
    pub fn finish(&self) -> Result<SpikeReport> {
        let total = self.total.snapshot();
        let recovery = self.recovery_time();

        let mut metrics = MetricSet::new();
        metrics.insert("http_reqs.count".to_string(), total.requests as f64);
        metrics.insert("http_req_failed.rate".to_string(), total.http_failed_rate());
        metrics.insert("errors.rate".to_string(), total.error_rate());
        metrics.insert("throttled.count".to_string(), total.throttled as f64);
        metrics.insert("throttled.rate".to_string(), ratio(total.throttled, total.requests));
        metrics.insert("not_found.count".to_string(), total.not_found as f64);
        metrics.insert("genuine_errors.count".to_string(), total.genuine_errors as f64);
        metrics.insert("recovery_time.seconds".to_string(), recovery.as_secs_f64());

        let specs = &self.options.thresholds;
        let stats = stats_for(OVERALL_TREND, &self.options.trend_stats, specs);
        insert_trend(&mut metrics, OVERALL_TREND, &self.latency.lock().summarize(), &stats);
        for (name, recorder) in self.endpoint_latency.lock().iter() {
            let stats = stats_for(name, &self.options.trend_stats, specs);
            insert_trend(&mut metrics, name, &recorder.summarize(), &stats);
        }

        let thresholds = evaluate(&metrics, specs)?;
        log_failures(self.logger.as_ref(), &thresholds);
        let passed = thresholds.overall_pass;
        if let Some(logger) = &self.logger {
            logger.send(RunEvent::RunCompleted {
                run: RUN_NAME,
                total_requests: total.requests,
                accuracy: None,
                passed,
            });
        }

        Ok(SpikeReport {
            total,
            phases: self.phase_summaries(),
            spike_window_secs: self
                .profile
                .spike_window()
                .map(|(start, end)| (start.as_secs_f64(), end.as_secs_f64())),
            recovery_time_secs: recovery.as_secs_f64(),
            no_op_stages: self.profile.no_op_stages().iter().map(|i| i + 1).collect(),
            metrics,
            thresholds,
            passed,
        })
    }

    fn phase_summaries(&self) -> Vec<PhaseSummary> {
        let mut order: Vec<usize> = Vec::new();
        for index in 0..self.profile.stages().len() {
            let slot = self.phase_slot(Some(index));
            if !order.contains(&slot) {
                order.push(slot);
            }
        }
        let overtime = StagePhase::ALL.len();
        if self.phases[overtime].requests.load(Ordering::Relaxed) > 0 {
            order.push(overtime);
        }
        order
            .into_iter()
            .map(|slot| {
                let tally = self.phases[slot].snapshot();
                PhaseSummary {
                    phase: StagePhase::ALL
                        .get(slot)
                        .map_or(OVERTIME_LABEL, |p| p.as_str())
                        .to_string(),
                    error_rate: tally.error_rate(),
                    tally,
                }
            })
            .collect()
    }
}

/// `products` → `products_latency`; anything outside `[A-Za-z0-9_]` becomes `_`.
#[must_use]
pub fn trend_name(endpoint: &str) -> String {
    let mut name: String = endpoint
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.push_str("_latency");
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::RlvError;
    use crate::core::record::{BodyFlags, Headers};

    fn start() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn record(at_secs: f64, status: u16, endpoint: Option<&str>) -> RequestRecord {
        RequestRecord {
            index: 1,
            timestamp: start() + chrono::Duration::milliseconds((at_secs * 1_000.0) as i64),
            status,
            headers: Headers::default(),
            body: if status == 200 {
                BodyFlags::content()
            } else {
                BodyFlags::empty()
            },
            latency_ms: 50.0,
            endpoint: endpoint.map(ToString::to_string),
        }
    }

    fn default_run() -> SpikeRun {
        let profile = LoadProfile::from_specs(&LoadProfile::default_spike_specs()).unwrap();
        SpikeRun::new(profile, start(), SpikeOptions::default())
    }

    #[test]
    fn throttles_excluded_from_error_rate_but_count_as_http_failures() {
        let run = default_run();
        for i in 0..90 {
            run.observe(&record(f64::from(i), 200, Some("products")));
        }
        for i in 0..10 {
            run.observe(&record(65.0 + f64::from(i), 429, None));
        }
        let report = run.finish().unwrap();
        assert_eq!(report.total.requests, 100);
        assert_eq!(report.total.throttled, 10);
        assert_eq!(report.metrics["errors.rate"], 0.0);
        assert!((report.metrics["http_req_failed.rate"] - 0.10).abs() < 1e-9);
        assert!(report.metrics.contains_key("products_latency.p(95)"));
    }

    #[test]
    fn genuine_errors_drive_error_rate() {
        let run = default_run();
        for i in 0..98 {
            run.observe(&record(f64::from(i) * 0.5, 200, None));
        }
        run.observe(&record(70.0, 500, None));
        run.observe(&record(71.0, 429, None));
        let report = run.finish().unwrap();
        // 1 genuine error over 99 non-throttled records.
        assert!((report.metrics["errors.rate"] - 1.0 / 99.0).abs() < 1e-9);
        assert!(!report.passed);
        let failed: Vec<&str> = report
            .thresholds
            .failures()
            .map(|e| e.spec.metric.as_str())
            .collect();
        assert_eq!(failed, vec!["errors.rate"]);
    }

    #[test]
    fn not_found_is_a_valid_answer() {
        let run = default_run();
        for i in 0..20 {
            run.observe(&record(f64::from(i), 404, None));
        }
        let report = run.finish().unwrap();
        assert_eq!(report.total.not_found, 20);
        assert_eq!(report.metrics["errors.rate"], 0.0);
        // The transport view still sees 4xx as failed.
        assert!((report.metrics["http_req_failed.rate"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recovery_measured_from_spike_end() {
        let run = default_run();
        // Spike stage is [60s, 90s).
        run.observe(&record(75.0, 429, None));
        run.observe(&record(95.0, 429, None));
        run.observe(&record(102.5, 503, None));
        run.observe(&record(130.0, 200, None));
        assert_eq!(run.recovery_time(), Duration::from_millis(12_500));
        let report = run.finish().unwrap();
        assert!((report.metrics["recovery_time.seconds"] - 12.5).abs() < 1e-9);
        assert_eq!(report.spike_window_secs, Some((60.0, 90.0)));
    }

    #[test]
    fn slow_recovery_fails_threshold() {
        let run = default_run();
        run.observe(&record(125.0, 429, None));
        let report = run.finish().unwrap();
        assert!((report.recovery_time_secs - 35.0).abs() < 1e-9);
        assert!(
            report
                .thresholds
                .failures()
                .any(|e| e.spec.metric == "recovery_time.seconds")
        );
    }

    #[test]
    fn no_disruption_means_zero_recovery() {
        let run = default_run();
        run.observe(&record(100.0, 200, None));
        assert_eq!(run.recovery_time(), Duration::ZERO);
    }

    #[test]
    fn phases_follow_profile_order_with_overtime_last() {
        let run = default_run();
        run.observe(&record(10.0, 200, None));
        run.observe(&record(70.0, 429, None));
        run.observe(&record(100.0, 200, None));
        run.observe(&record(170.0, 200, None));
        run.observe(&record(400.0, 200, None));
        let report = run.finish().unwrap();
        let labels: Vec<&str> = report.phases.iter().map(|p| p.phase.as_str()).collect();
        assert_eq!(
            labels,
            vec!["ramp_up", "spike", "recovery", "ramp_down", OVERTIME_LABEL]
        );
        assert_eq!(report.phases[1].tally.throttled, 1);
        assert_eq!(run.phase_label(Duration::from_secs(400)), OVERTIME_LABEL);
    }

    #[test]
    fn threshold_on_unseen_endpoint_is_fatal() {
        let profile = LoadProfile::from_specs(&LoadProfile::default_spike_specs()).unwrap();
        let options = SpikeOptions {
            thresholds: ThresholdSpec::parse_all(&["user_latency.p(95)<200"]).unwrap(),
            ..SpikeOptions::default()
        };
        let run = SpikeRun::new(profile, start(), options);
        run.observe(&record(1.0, 200, Some("products")));
        assert!(matches!(
            run.finish(),
            Err(RlvError::MetricReference { .. })
        ));
    }

    #[test]
    fn opted_in_endpoint_threshold_passes_on_tagged_records() {
        let profile = LoadProfile::from_specs(&LoadProfile::default_spike_specs()).unwrap();
        let options = SpikeOptions {
            thresholds: ThresholdSpec::parse_all(&["user_latency.p(95)<200"]).unwrap(),
            ..SpikeOptions::default()
        };
        let run = SpikeRun::new(profile, start(), options);
        run.observe(&record(1.0, 200, Some("user")));
        run.observe(&record(2.0, 200, Some("user")));
        let report = run.finish().unwrap();
        assert!(report.thresholds.overall_pass);
    }

    #[test]
    fn trend_names_are_metric_safe() {
        assert_eq!(trend_name("user"), "user_latency");
        assert_eq!(trend_name("/api/products"), "_api_products_latency");
        assert_eq!(trend_name("2fa"), "_2fa_latency");
    }
}
