//! Run logger: a dedicated thread owns the `JsonlWriter`; run drivers send
//! `RunEvent`s over a bounded crossbeam channel.
//!
//! `send()` uses `try_send()`, so folding records is never blocked by logging
//! back-pressure. Dropped events are counted and reported in the log itself.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, RlvError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run: &'static str,
        tier: Option<String>,
        planned_requests: Option<u64>,
        config_hash: String,
    },
    /// Periodic heartbeat while a probe is folded.
    Progress {
        index: u64,
        status: u16,
        outcome: String,
    },
    /// First throttle observed past the quota.
    BoundaryEnforced { index: u64, quota: u64 },
    /// Throttled while still inside the quota.
    EarlyThrottle { index: u64, quota: u64 },
    /// Admitted after the quota was exhausted.
    LateAdmit { index: u64, quota: u64 },
    UnexpectedStatus { index: u64, status: u16 },
    PhaseEntered {
        phase: String,
        elapsed_ms: u64,
        target: u32,
    },
    ThresholdFailed { threshold: String, observed: f64 },
    RunCompleted {
        run: &'static str,
        total_requests: u64,
        accuracy: Option<f64>,
        passed: bool,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending run events from any thread.
#[derive(Clone)]
pub struct RunLoggerHandle {
    tx: Sender<RunEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl RunLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel drops
    /// the event and bumps the dropped counter.
    pub fn send(&self, event: RunEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the sentinel
    /// is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RunEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

pub struct RunLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl RunLoggerConfig {
    #[must_use]
    pub fn new(jsonl_config: JsonlConfig) -> Self {
        Self {
            jsonl_config,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle plus its join handle.
///
/// The thread runs until `handle.shutdown()` is called or every handle is
/// dropped.
pub fn spawn_logger(config: RunLoggerConfig) -> Result<(RunLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<RunEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = RunLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("rlv-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl_config, &dropped_clone))
        .map_err(|e| RlvError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<RunEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, RunEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &RunEvent) -> LogEntry {
    match event {
        RunEvent::RunStarted {
            run,
            tier,
            planned_requests,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.run = Some((*run).to_string());
            e.tier.clone_from(tier);
            e.details = Some(match planned_requests {
                Some(n) => format!("planned_requests={n} config_hash={config_hash}"),
                None => format!("config_hash={config_hash}"),
            });
            e
        }
        RunEvent::Progress {
            index,
            status,
            outcome,
        } => {
            let mut e = LogEntry::new(EventType::Progress, Severity::Info);
            e.index = Some(*index);
            e.status = Some(*status);
            e.outcome = Some(outcome.clone());
            e
        }
        RunEvent::BoundaryEnforced { index, quota } => {
            let mut e = LogEntry::new(EventType::BoundaryEnforced, Severity::Info);
            e.index = Some(*index);
            e.quota = Some(*quota);
            e.ok = Some(true);
            e
        }
        RunEvent::EarlyThrottle { index, quota } => {
            let mut e = LogEntry::new(EventType::EarlyThrottle, Severity::Warning);
            e.index = Some(*index);
            e.quota = Some(*quota);
            e.details = Some(format!("request {index} throttled within quota {quota}"));
            e.ok = Some(false);
            e
        }
        RunEvent::LateAdmit { index, quota } => {
            let mut e = LogEntry::new(EventType::LateAdmit, Severity::Warning);
            e.index = Some(*index);
            e.quota = Some(*quota);
            e.details = Some(format!("request {index} admitted past quota {quota}"));
            e.ok = Some(false);
            e
        }
        RunEvent::UnexpectedStatus { index, status } => {
            let mut e = LogEntry::new(EventType::UnexpectedStatus, Severity::Warning);
            e.index = Some(*index);
            e.status = Some(*status);
            e.ok = Some(false);
            e
        }
        RunEvent::PhaseEntered {
            phase,
            elapsed_ms,
            target,
        } => {
            let mut e = LogEntry::new(EventType::PhaseEnter, Severity::Info);
            e.phase = Some(phase.clone());
            e.elapsed_ms = Some(*elapsed_ms);
            e.details = Some(format!("target={target}"));
            e
        }
        RunEvent::ThresholdFailed {
            threshold,
            observed,
        } => {
            let mut e = LogEntry::new(EventType::ThresholdFail, Severity::Critical);
            e.threshold = Some(threshold.clone());
            e.observed = Some(*observed);
            e.ok = Some(false);
            e
        }
        RunEvent::RunCompleted {
            run,
            total_requests,
            accuracy,
            passed,
        } => {
            let mut e = LogEntry::new(
                EventType::RunComplete,
                if *passed {
                    Severity::Info
                } else {
                    Severity::Warning
                },
            );
            e.run = Some((*run).to_string());
            e.accuracy = *accuracy;
            e.ok = Some(*passed);
            e.details = Some(format!("total_requests={total_requests}"));
            e
        }
        RunEvent::Shutdown => LogEntry::new(EventType::RunComplete, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
