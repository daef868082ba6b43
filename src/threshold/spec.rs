//! Threshold specs: `metric op value`, e.g. `errors.rate < 0.01`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{Result, RlvError};

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<metric>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_().]+)?)\s*(?P<op><=|>=|==|!=|<|>)\s*(?P<value>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*$",
    )
    .expect("threshold expression regex is valid")
});

/// Comparison operator between an observed value and a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Comparison {
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
}

impl Comparison {
    /// Operator as written in an expression.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// Whether `observed <op> bound` holds. NaN never satisfies anything.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        if observed.is_nan() {
            return false;
        }
        match self {
            Self::Lt => observed < bound,
            Self::Le => observed <= bound,
            Self::Gt => observed > bound,
            Self::Ge => observed >= bound,
            Self::Eq => observed == bound,
            Self::Ne => observed != bound,
        }
    }
}

impl FromStr for Comparison {
    type Err = RlvError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            other => Err(RlvError::InvalidThreshold {
                expression: other.to_string(),
                details: "unknown comparison operator".to_string(),
            }),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One named bound over a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSpec {
    /// Metric key, e.g. `errors.rate`.
    pub metric: String,
    /// How the observed value must compare to `value`.
    pub op: Comparison,
    /// Finite bound.
    pub value: f64,
}

impl ThresholdSpec {
    /// Build a spec directly. The metric must be non-empty and the bound finite.
    pub fn new(metric: &str, op: Comparison, value: f64) -> Result<Self> {
        let metric = metric.trim();
        let invalid = |details: &str| RlvError::InvalidThreshold {
            expression: format!("{metric}{op}{value}"),
            details: details.to_string(),
        };
        if metric.is_empty() {
            return Err(invalid("metric name is empty"));
        }
        if !value.is_finite() {
            return Err(invalid("bound must be finite"));
        }
        Ok(Self {
            metric: metric.to_string(),
            op,
            value,
        })
    }

    /// Parse `metric op value`, e.g. `http_req_duration.p(95) < 500`.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |details: &str| RlvError::InvalidThreshold {
            expression: expression.to_string(),
            details: details.to_string(),
        };
        let caps = EXPRESSION
            .captures(expression)
            .ok_or_else(|| invalid("expected `metric <op> number`"))?;
        let value: f64 = caps["value"]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        if !value.is_finite() {
            return Err(invalid("bound must be finite"));
        }
        Ok(Self {
            metric: caps["metric"].to_string(),
            op: caps["op"].parse()?,
            value,
        })
    }

    /// Parse a k6-style expression attached to a metric: `("errors", "rate<0.01")`.
    pub fn parse_for_metric(metric: &str, expression: &str) -> Result<Self> {
        Self::parse(&format!("{}.{}", metric.trim(), expression.trim()))
    }

    /// Parse a whole list, failing on the first malformed entry.
    pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<Self>> {
        expressions.iter().map(|e| Self::parse(e.as_ref())).collect()
    }
}

impl FromStr for ThresholdSpec {
    type Err = RlvError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.metric, self.op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_aggregated_metrics() {
        let spec = ThresholdSpec::parse("errors<0.01").unwrap();
        assert_eq!(spec, ThresholdSpec::new("errors", Comparison::Lt, 0.01).unwrap());

        let spec = ThresholdSpec::parse(" http_req_duration.p(95) <= 500 ").unwrap();
        assert_eq!(spec.metric, "http_req_duration.p(95)");
        assert_eq!(spec.op, Comparison::Le);
        assert!((spec.value - 500.0).abs() < f64::EPSILON);

        let spec = ThresholdSpec::parse("latency.p(99.9)>=1e3").unwrap();
        assert_eq!(spec.metric, "latency.p(99.9)");
        assert!((spec.value - 1_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn k6_style_expression_attaches_to_metric() {
        let spec = ThresholdSpec::parse_for_metric("successful_requests", "count>=55").unwrap();
        assert_eq!(spec.metric, "successful_requests.count");
        assert_eq!(spec.op, Comparison::Ge);
    }

    #[test]
    fn malformed_expressions_rejected() {
        for raw in ["", "errors", "errors<", "<0.01", "errors=0.01", "errors<abc", "9lives<1"] {
            let err = ThresholdSpec::parse(raw).unwrap_err();
            assert!(
                matches!(err, RlvError::InvalidThreshold { .. }),
                "{raw:?} gave {err}"
            );
        }
    }

    #[test]
    fn constructor_rejects_non_finite_bounds_and_empty_metric() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = ThresholdSpec::new("errors.rate", Comparison::Lt, value).unwrap_err();
            assert!(matches!(err, RlvError::InvalidThreshold { .. }), "{value}: {err}");
            assert!(err.is_configuration());
        }
        assert!(ThresholdSpec::new("  ", Comparison::Lt, 1.0).is_err());
    }

    #[test]
    fn parse_all_stops_at_first_bad_entry() {
        let err = ThresholdSpec::parse_all(&["errors.rate<0.01", "nope"]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn comparisons_hold() {
        assert!(Comparison::Lt.holds(0.005, 0.01));
        assert!(!Comparison::Lt.holds(0.01, 0.01));
        assert!(Comparison::Le.holds(0.01, 0.01));
        assert!(Comparison::Gt.holds(2.0, 1.0));
        assert!(Comparison::Ge.holds(1.0, 1.0));
        assert!(Comparison::Eq.holds(3.0, 3.0));
        assert!(Comparison::Ne.holds(3.0, 4.0));
        assert!(!Comparison::Ne.holds(f64::NAN, 4.0));
    }

    #[test]
    fn display_is_compact() {
        let spec = ThresholdSpec::parse("errors.rate < 0.01").unwrap();
        assert_eq!(spec.to_string(), "errors.rate<0.01");
    }
}
