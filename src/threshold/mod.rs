//! Named thresholds over run metrics and their pass/fail evaluation.

pub mod evaluator;
pub mod spec;
