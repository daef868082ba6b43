//! Threshold evaluation over a flat metric set.
//!
//! Every spec is evaluated on its own; the overall verdict is the AND of all
//! of them. A spec naming a metric the run never produced is a configuration
//! error rather than a failed threshold.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::{Result, RlvError};
use crate::threshold::spec::ThresholdSpec;

/// Metric name → scalar. Keys are `name.aggregate` by convention
/// (`errors.rate`, `http_req_duration.p(95)`), but any key works.
pub type MetricSet = BTreeMap<String, f64>;

/// Build a conventional metric key.
#[must_use]
pub fn metric_key(name: &str, aggregate: &str) -> String {
    format!("{name}.{aggregate}")
}

/// Result of checking one spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdEvaluation {
    /// The spec that was checked.
    pub spec: ThresholdSpec,
    /// Value the run produced for the spec's metric.
    pub observed: f64,
    /// Whether the bound held.
    pub ok: bool,
}

/// Every evaluation, in spec order, plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    /// One entry per spec, in the order given.
    pub evaluations: Vec<ThresholdEvaluation>,
    /// AND of every evaluation; true when there are none.
    pub overall_pass: bool,
}

impl ThresholdOutcome {
    /// Evaluations whose bound did not hold.
    pub fn failures(&self) -> impl Iterator<Item = &ThresholdEvaluation> {
        self.evaluations.iter().filter(|e| !e.ok)
    }
}

/// Evaluate `specs` in order against `metrics`.
pub fn evaluate(metrics: &MetricSet, specs: &[ThresholdSpec]) -> Result<ThresholdOutcome> {
    let evaluations = specs
        .iter()
        .map(|spec| {
            let observed = *metrics
                .get(&spec.metric)
                .ok_or_else(|| RlvError::MetricReference {
                    metric: spec.metric.clone(),
                })?;
            Ok(ThresholdEvaluation {
                ok: spec.op.holds(observed, spec.value),
                spec: spec.clone(),
                observed,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let overall_pass = evaluations.iter().all(|e| e.ok);
    Ok(ThresholdOutcome {
        evaluations,
        overall_pass,
    })
}
