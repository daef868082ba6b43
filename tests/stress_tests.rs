//! Stress tests: many folding actors sharing one run, and a logger flooded
//! past its channel capacity.
//!
//! Each scenario prints a short report so `cargo test -- --nocapture` shows
//! the volumes involved.

use std::fmt::Write as _;
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;

use ratelimit_verdict::classify::expectation::classify_expectation;
use ratelimit_verdict::classify::observation::ObservedOutcome;
use ratelimit_verdict::core::record::{BodyFlags, Headers, RequestRecord};
use ratelimit_verdict::logger::jsonl::JsonlConfig;
use ratelimit_verdict::logger::run_log::{RunEvent, RunLoggerConfig, spawn_logger};
use ratelimit_verdict::metrics::confusion::{ConfusionCounts, SharedConfusionCounts};
use ratelimit_verdict::profile::stages::LoadProfile;
use ratelimit_verdict::run::spike::{SpikeOptions, SpikeRun};

// ════════════════════════════════════════════════════════════════
// INFRASTRUCTURE
// ════════════════════════════════════════════════════════════════

const WORKERS: u64 = 8;

/// Stress report emitted at the end of each scenario.
struct StressReport {
    scenario: String,
    steps: u64,
    metrics: Vec<(String, String)>,
    pass: bool,
}

impl StressReport {
    fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            steps: 0,
            metrics: Vec::new(),
            pass: true,
        }
    }
    fn metric(&mut self, key: &str, value: impl std::fmt::Display) {
        self.metrics.push((key.to_string(), value.to_string()));
    }
    fn emit(&self) -> String {
        let mut out = String::new();
        writeln!(out, "═══ Stress: {} ═══", self.scenario).unwrap();
        writeln!(out, "Result: {}", if self.pass { "PASS" } else { "FAIL" }).unwrap();
        writeln!(out, "Steps: {}", self.steps).unwrap();
        for (k, v) in &self.metrics {
            writeln!(out, "  {k}: {v}").unwrap();
        }
        out
    }
}

fn epoch() -> DateTime<Utc> {
    "2026-01-01T00:00:00Z".parse().unwrap()
}

/// Deterministic mixed-status record; latencies are whole milliseconds.
fn synthetic_record(index: u64) -> RequestRecord {
    let status = match index % 23 {
        0 => 500,
        1..=4 => 429,
        5 => 404,
        _ => 200,
    };
    let headers = if status == 429 {
        Headers::default().with("Retry-After", "30")
    } else {
        Headers::default()
    };
    let body = match status {
        200 => BodyFlags::content(),
        429 => BodyFlags::error(),
        _ => BodyFlags::empty(),
    };
    #[allow(clippy::cast_possible_wrap)]
    let at_ms = (index * 9) as i64;
    RequestRecord {
        index,
        timestamp: epoch() + ChronoDuration::milliseconds(at_ms),
        status,
        headers,
        body,
        latency_ms: f64::from(u32::try_from(index % 250).unwrap_or(0) + 1),
        endpoint: Some(if index % 2 == 0 { "users" } else { "products" }.to_string()),
    }
}

fn observed(index: u64) -> ObservedOutcome {
    match index % 7 {
        0 => ObservedOutcome::UnexpectedError,
        1 | 2 => ObservedOutcome::Throttled {
            retry_hint: "60".to_string(),
        },
        _ => ObservedOutcome::Success,
    }
}

// ════════════════════════════════════════════════════════════════
// SCENARIO 1: shared confusion counts under contention
// ════════════════════════════════════════════════════════════════

#[test]
fn stress_shared_counts_from_many_threads() {
    const PER_WORKER: u64 = 25_000;
    const QUOTA: u64 = 60_000;
    let mut report = StressReport::new("shared_counts_contention");
    let started = Instant::now();

    let shared = SharedConfusionCounts::new();
    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let shared = &shared;
            scope.spawn(move || {
                for i in 0..PER_WORKER {
                    let index = worker * PER_WORKER + i + 1;
                    shared.fold(classify_expectation(index, QUOTA), &observed(index));
                }
            });
        }
    });

    let sequential = (1..=WORKERS * PER_WORKER).fold(ConfusionCounts::default(), |acc, index| {
        acc.fold(classify_expectation(index, QUOTA), &observed(index))
    });
    let snapshot = shared.snapshot();
    report.steps = WORKERS * PER_WORKER;
    report.pass = snapshot == sequential;
    report.metric("elapsed_ms", started.elapsed().as_millis());
    report.metric("true_admit", snapshot.true_admit);
    report.metric("false_admit", snapshot.false_admit);
    println!("{}", report.emit());

    assert_eq!(snapshot, sequential);
    assert_eq!(snapshot.total(), WORKERS * PER_WORKER);
}

// ════════════════════════════════════════════════════════════════
// SCENARIO 2: concurrent spike fold matches sequential fold
// ════════════════════════════════════════════════════════════════

#[test]
fn stress_concurrent_spike_fold_matches_sequential() {
    const RECORDS: u64 = 20_000;
    let mut report = StressReport::new("spike_fold_concurrency");
    let records: Vec<RequestRecord> = (1..=RECORDS).map(synthetic_record).collect();
    let profile = LoadProfile::from_specs(&LoadProfile::default_spike_specs()).unwrap();

    let sequential = SpikeRun::new(profile.clone(), epoch(), SpikeOptions::default());
    for rec in &records {
        sequential.observe(rec);
    }

    let started = Instant::now();
    let concurrent = SpikeRun::new(profile, epoch(), SpikeOptions::default());
    #[allow(clippy::cast_possible_truncation)]
    let chunk = (RECORDS / WORKERS) as usize;
    thread::scope(|scope| {
        for slice in records.chunks(chunk) {
            let run = &concurrent;
            scope.spawn(move || {
                for rec in slice.iter().rev() {
                    run.observe(rec);
                }
            });
        }
    });

    let expected = sequential.finish().unwrap();
    let actual = concurrent.finish().unwrap();
    report.steps = RECORDS;
    report.pass = expected == actual;
    report.metric("elapsed_ms", started.elapsed().as_millis());
    report.metric("throttled", actual.total.throttled);
    report.metric("genuine_errors", actual.total.genuine_errors);
    report.metric("recovery_time_secs", actual.recovery_time_secs);
    println!("{}", report.emit());

    assert_eq!(actual.total.requests, RECORDS);
    assert_eq!(
        actual.phases.iter().map(|p| p.tally.requests).sum::<u64>(),
        RECORDS
    );
    assert_eq!(expected, actual);
}

// ════════════════════════════════════════════════════════════════
// SCENARIO 3: logger flooded past channel capacity
// ════════════════════════════════════════════════════════════════

#[test]
fn stress_logger_accounts_for_every_event() {
    const PER_WORKER: u64 = 5_000;
    let mut report = StressReport::new("logger_backpressure");
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("runs.jsonl");
    let mut config = RunLoggerConfig::new(JsonlConfig::at(&log_path));
    config.channel_capacity = 64;
    let (handle, join) = spawn_logger(config).unwrap();

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let handle = handle.clone();
            scope.spawn(move || {
                for i in 0..PER_WORKER {
                    handle.send(RunEvent::Progress {
                        index: worker * PER_WORKER + i + 1,
                        status: 200,
                        outcome: "SUCCESS".to_string(),
                    });
                }
            });
        }
    });
    handle.shutdown();
    join.join().unwrap();

    let raw = std::fs::read_to_string(&log_path).unwrap();
    let mut written = 0_u64;
    let mut reported_dropped = 0_u64;
    for line in raw.lines() {
        let entry: Value = serde_json::from_str(line).unwrap();
        match entry["event"].as_str() {
            Some("progress") => written += 1,
            Some("error") => {
                let details = entry["details"].as_str().unwrap_or_default();
                reported_dropped += details
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or(0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    report.steps = WORKERS * PER_WORKER;
    report.pass = written + reported_dropped == WORKERS * PER_WORKER;
    report.metric("written", written);
    report.metric("dropped", reported_dropped);
    println!("{}", report.emit());

    assert_eq!(written + reported_dropped, WORKERS * PER_WORKER);
    assert_eq!(handle.dropped_events(), 0);
}
