//! Report rendering: flat field maps for machine consumers and the plain-text
//! run summaries.
//!
//! Every outcome category is listed even when zero, and every threshold is
//! listed with its verdict.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{Value, json};

use crate::metrics::latency::TrendStat;
use crate::metrics::scorer::AccuracyReport;
use crate::run::probe::ProbeReport;
use crate::run::spike::SpikeReport;
use crate::threshold::evaluator::{ThresholdEvaluation, ThresholdOutcome};

/// Width of the `=` rules framing a summary.
pub const RULE_WIDTH: usize = 60;

/// Flat name → value view of a report.
pub trait ToFields {
    fn to_fields(&self) -> BTreeMap<String, Value>;
}

impl ToFields for AccuracyReport {
    fn to_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("tier".to_string(), json!(self.tier.to_string()));
        fields.insert("rate_limit".to_string(), json!(self.quota));
        fields.insert("total_requests".to_string(), json!(self.total_requests));
        fields.insert(
            "successful_requests".to_string(),
            json!(self.counts.successes()),
        );
        fields.insert(
            "rate_limited_requests".to_string(),
            json!(self.counts.throttled()),
        );
        fields.insert(
            "unexpected_errors".to_string(),
            json!(self.counts.unexpected_error),
        );
        fields.insert("true_admit".to_string(), json!(self.counts.true_admit));
        fields.insert("false_throttle".to_string(), json!(self.counts.false_throttle));
        fields.insert("true_throttle".to_string(), json!(self.counts.true_throttle));
        fields.insert("false_admit".to_string(), json!(self.counts.false_admit));
        fields.insert("success_accuracy".to_string(), json!(round2(self.success_accuracy)));
        fields.insert(
            "rejection_accuracy".to_string(),
            json!(round2(self.rejection_accuracy)),
        );
        fields.insert("accuracy".to_string(), json!(round2(self.overall_accuracy)));
        fields.insert("test_passed".to_string(), json!(self.passed));
        fields.insert(
            "within_tolerance".to_string(),
            json!(self.tolerance.passed()),
        );
        fields
    }
}

impl ToFields for ThresholdEvaluation {
    fn to_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("threshold".to_string(), json!(self.spec.to_string()));
        fields.insert("metric".to_string(), json!(self.spec.metric));
        fields.insert("observed".to_string(), json!(self.observed));
        fields.insert("ok".to_string(), json!(self.ok));
        fields
    }
}

impl ToFields for ProbeReport {
    fn to_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = self.accuracy.to_fields();
        fields.insert("planned_requests".to_string(), json!(self.planned_requests));
        fields.insert(
            "first_throttle_index".to_string(),
            json!(self.first_throttle_index),
        );
        fields.insert("boundary_offset".to_string(), json!(self.boundary_offset));
        fields.insert("thresholds".to_string(), thresholds_value(&self.thresholds));
        fields.insert("passed".to_string(), json!(self.passed));
        fields
    }
}

impl ToFields for SpikeReport {
    fn to_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("total_requests".to_string(), json!(self.total.requests));
        fields.insert("admitted".to_string(), json!(self.total.admitted));
        fields.insert("not_found".to_string(), json!(self.total.not_found));
        fields.insert("throttled".to_string(), json!(self.total.throttled));
        fields.insert("genuine_errors".to_string(), json!(self.total.genuine_errors));
        fields.insert("http_failed".to_string(), json!(self.total.http_failed));
        fields.insert(
            "http_error_rate".to_string(),
            json!(self.total.http_failed_rate()),
        );
        fields.insert("error_rate".to_string(), json!(self.total.error_rate()));
        fields.insert(
            "recovery_time_secs".to_string(),
            json!(self.recovery_time_secs),
        );
        fields.insert(
            "phases".to_string(),
            Value::Array(
                self.phases
                    .iter()
                    .map(|p| {
                        json!({
                            "phase": p.phase,
                            "requests": p.tally.requests,
                            "admitted": p.tally.admitted,
                            "not_found": p.tally.not_found,
                            "throttled": p.tally.throttled,
                            "genuine_errors": p.tally.genuine_errors,
                            "http_failed": p.tally.http_failed,
                            "error_rate": p.error_rate,
                        })
                    })
                    .collect(),
            ),
        );
        fields.insert("thresholds".to_string(), thresholds_value(&self.thresholds));
        fields.insert("passed".to_string(), json!(self.passed));
        fields
    }
}

fn thresholds_value(outcome: &ThresholdOutcome) -> Value {
    Value::Array(
        outcome
            .evaluations
            .iter()
            .map(|e| Value::Object(e.to_fields().into_iter().collect()))
            .collect(),
    )
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn mark(ok: bool) -> &'static str {
    if ok { "✓" } else { "✗" }
}

fn push_thresholds(out: &mut String, indent: &str, outcome: &ThresholdOutcome) {
    let _ = writeln!(out, "{indent}Threshold Checks:");
    for evaluation in &outcome.evaluations {
        let _ = writeln!(
            out,
            "{indent}  {} {} (observed: {:.2})",
            mark(evaluation.ok),
            evaluation.spec,
            evaluation.observed
        );
    }
}

/// Plain-text probe summary.
#[must_use]
pub fn render_probe_summary(report: &ProbeReport, pass_threshold_pct: f64) -> String {
    let accuracy = &report.accuracy;
    let counts = &accuracy.counts;
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "Rate Limit Validation - {} Tier", accuracy.tier);
    let _ = writeln!(out, "{}\n", rule());
    let _ = writeln!(out, "Rate Limit: {} requests/minute", accuracy.quota);
    let _ = writeln!(
        out,
        "Total Requests: {} (planned: {})\n",
        accuracy.total_requests, report.planned_requests
    );

    let _ = writeln!(out, "Results:");
    let _ = writeln!(
        out,
        "  Successful Requests: {} (expected: {})",
        counts.successes(),
        accuracy.expected_successes
    );
    let _ = writeln!(
        out,
        "  Rate Limited Requests: {} (expected: {})",
        counts.throttled(),
        accuracy.expected_rejections
    );
    let _ = writeln!(out, "  Unexpected Errors: {}\n", counts.unexpected_error);

    let _ = writeln!(out, "Outcomes:");
    let _ = writeln!(out, "  True Admit:     {}", counts.true_admit);
    let _ = writeln!(out, "  False Throttle: {}", counts.false_throttle);
    let _ = writeln!(out, "  True Throttle:  {}", counts.true_throttle);
    let _ = writeln!(out, "  False Admit:    {}", counts.false_admit);
    let _ = writeln!(out, "  Unexpected:     {}", counts.unexpected_error);
    match (report.first_throttle_index, report.boundary_offset) {
        (Some(index), Some(offset)) => {
            let _ = writeln!(out, "  First Throttle: request {index} (offset {offset:+})\n");
        }
        _ => {
            let _ = writeln!(out, "  First Throttle: none\n");
        }
    }

    let _ = writeln!(
        out,
        "Success Accuracy: {:.2}%  Rejection Accuracy: {:.2}%",
        accuracy.success_accuracy, accuracy.rejection_accuracy
    );
    let _ = writeln!(out, "Accuracy: {:.2}%", accuracy.overall_accuracy);
    let _ = writeln!(
        out,
        "Status: {}\n",
        if accuracy.passed { "✓ PASS" } else { "✗ FAIL" }
    );
    if accuracy.passed {
        let _ = writeln!(
            out,
            "✓ Rate limiting enforced correctly for {} tier\n",
            accuracy.tier
        );
    } else {
        let _ = writeln!(
            out,
            "✗ Rate limiting accuracy below threshold ({pass_threshold_pct}%)\n"
        );
    }

    push_thresholds(&mut out, "", &report.thresholds);
    let _ = writeln!(out, "{}", rule());
    out
}

/// Plain-text spike summary. `trend_stats` picks the response-time lines.
#[must_use]
pub fn render_spike_summary(report: &SpikeReport, trend_stats: &[TrendStat]) -> String {
    let indent = " ";
    let total = &report.total;
    let mut out = String::new();
    let _ = writeln!(out, "\n{indent}Spike Test Summary");
    let _ = writeln!(out, "{indent}{}\n", rule());
    let _ = writeln!(out, "{indent}Total Requests: {}\n", total.requests);

    let _ = writeln!(out, "{indent}Response Times:");
    for stat in trend_stats {
        let key = format!("http_req_duration.{stat}");
        if let Some(value) = report.metrics.get(&key) {
            let _ = writeln!(out, "{indent}  {}: {value:.2}ms", stat_label(*stat));
        }
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "{indent}HTTP Error Rate (includes 429): {:.2}%",
        total.http_failed_rate() * 100.0
    );
    let _ = writeln!(out, "{indent}Failed Requests: {}", total.http_failed);
    let _ = writeln!(
        out,
        "{indent}Successful Requests: {}\n",
        total.requests - total.http_failed
    );
    let _ = writeln!(
        out,
        "{indent}Custom Error Rate (excludes 429): {:.2}%",
        total.error_rate() * 100.0
    );
    let _ = writeln!(out, "{indent}Real Errors (non-429): {}", total.genuine_errors);
    let _ = writeln!(out, "{indent}Admitted: {}", total.admitted);
    let _ = writeln!(out, "{indent}Not Found: {}", total.not_found);
    let _ = writeln!(out, "{indent}Throttled: {}\n", total.throttled);

    let _ = writeln!(out, "{indent}Phases:");
    for phase in &report.phases {
        let _ = writeln!(
            out,
            "{indent}  {:<10} requests={} throttled={} errors={} error_rate={:.2}%",
            phase.phase,
            phase.tally.requests,
            phase.tally.throttled,
            phase.tally.genuine_errors,
            phase.error_rate * 100.0
        );
    }
    let _ = writeln!(
        out,
        "{indent}Recovery Time: {:.1}s\n",
        report.recovery_time_secs
    );

    push_thresholds(&mut out, indent, &report.thresholds);
    out
}

fn stat_label(stat: TrendStat) -> String {
    match stat {
        TrendStat::Min => "Min".to_string(),
        TrendStat::Med => "Med".to_string(),
        TrendStat::Avg => "Avg".to_string(),
        TrendStat::Max => "Max".to_string(),
        TrendStat::Count => "Count".to_string(),
        TrendStat::Percentile(_) => stat.to_string().replace(['(', ')'], ""),
    }
}
