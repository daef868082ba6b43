//! Accuracy scorer: quota-boundary enforcement accuracy from final counts.
//!
//! ```text
//! success_accuracy   = true_admit    / quota                    * 100
//! rejection_accuracy = true_throttle / (total_requests - quota) * 100
//! overall_accuracy   = min(success_accuracy, rejection_accuracy)
//! passed             = overall_accuracy > pass_threshold_pct
//! ```
//!
//! Strict accuracy and the tolerance band are reported side by side: network
//! interleaving near a window edge can shift the observed boundary by a few
//! requests, so each side also gets a minimum acceptable *count*.

#![allow(clippy::cast_precision_loss)]

use serde::Serialize;

use crate::classify::expectation::expected_rejections;
use crate::core::errors::{Result, RlvError};
use crate::core::tier::{Tier, TierId};
use crate::metrics::confusion::ConfusionCounts;

/// Accuracy (percent) a run must strictly exceed to pass.
pub const DEFAULT_PASS_THRESHOLD_PCT: f64 = 99.0;

/// Requests of slack allowed on each side of the boundary.
pub const DEFAULT_TOLERANCE_REQUESTS: u64 = 5;

/// Per-side slack, in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TolerancePolicy {
    /// Admits that may go missing before the success side fails.
    pub success: u64,
    /// Throttles that may go missing before the rejection side fails.
    pub rejection: u64,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            success: DEFAULT_TOLERANCE_REQUESTS,
            rejection: DEFAULT_TOLERANCE_REQUESTS,
        }
    }
}

/// Count-based verdict, reported next to the strict accuracy verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToleranceVerdict {
    /// `quota - success tolerance`, floored at zero.
    pub min_success_count: u64,
    /// `(total - quota) - rejection tolerance`, floored at zero.
    pub min_rejection_count: u64,
    /// Observed successes reached `min_success_count`.
    pub success_within_tolerance: bool,
    /// Observed throttles reached `min_rejection_count`.
    pub rejection_within_tolerance: bool,
}

impl ToleranceVerdict {
    /// Both sides within tolerance.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.success_within_tolerance && self.rejection_within_tolerance
    }
}

/// Scored probe. Accuracies are percentages in `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// Tier under test.
    pub tier: TierId,
    /// Its quota per window.
    pub quota: u64,
    /// Requests issued, the denominator base for rejection accuracy.
    pub total_requests: u64,
    /// Frozen confusion counts the report was scored from.
    pub counts: ConfusionCounts,
    /// Equal to the quota.
    pub expected_successes: u64,
    /// `total_requests - quota`.
    pub expected_rejections: u64,
    /// `true_admit / quota`.
    pub success_accuracy: f64,
    /// `true_throttle / expected_rejections`.
    pub rejection_accuracy: f64,
    /// The weaker of the two sides.
    pub overall_accuracy: f64,
    /// `overall_accuracy` strictly above the pass threshold.
    pub passed: bool,
    /// Count-based tolerance verdict.
    pub tolerance: ToleranceVerdict,
}

/// Scoring policy: pass threshold plus tolerance band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyScorer {
    pass_threshold_pct: f64,
    tolerance: TolerancePolicy,
}

impl Default for AccuracyScorer {
    fn default() -> Self {
        Self::new(DEFAULT_PASS_THRESHOLD_PCT, TolerancePolicy::default())
    }
}

impl AccuracyScorer {
    /// Scorer passing runs whose accuracy strictly exceeds `pass_threshold_pct`.
    #[must_use]
    pub fn new(pass_threshold_pct: f64, tolerance: TolerancePolicy) -> Self {
        Self {
            pass_threshold_pct,
            tolerance,
        }
    }

    /// Configured tolerance band.
    #[must_use]
    pub fn tolerance(&self) -> TolerancePolicy {
        self.tolerance
    }

    /// Accuracy percentage a run must strictly exceed.
    #[must_use]
    pub fn pass_threshold_pct(&self) -> f64 {
        self.pass_threshold_pct
    }

    /// Score a frozen snapshot of counts.
    ///
    /// `total_requests` is what was actually issued, which may be fewer than
    /// planned if the run was cut short. At least one request beyond the quota
    /// is required, otherwise rejection accuracy has no meaning.
    pub fn score(
        &self,
        tier: &Tier,
        counts: &ConfusionCounts,
        total_requests: u64,
    ) -> Result<AccuracyReport> {
        let quota = tier.quota;
        if quota == 0 {
            return Err(RlvError::InvalidConfig {
                details: format!("tier {} quota must be > 0", tier.id),
            });
        }
        if total_requests <= quota {
            return Err(RlvError::NoRejectionWindow {
                quota,
                total_requests,
            });
        }
        if counts.total() > total_requests {
            return Err(RlvError::InvalidConfig {
                details: format!(
                    "total_requests ({total_requests}) is below the {} records folded",
                    counts.total()
                ),
            });
        }

        let rejections = expected_rejections(quota, total_requests);
        let success_accuracy = counts.true_admit as f64 / quota as f64 * 100.0;
        let rejection_accuracy = counts.true_throttle as f64 / rejections as f64 * 100.0;
        let overall_accuracy = success_accuracy.min(rejection_accuracy);

        let min_success_count = quota.saturating_sub(self.tolerance.success);
        let min_rejection_count = rejections.saturating_sub(self.tolerance.rejection);

        Ok(AccuracyReport {
            tier: tier.id.clone(),
            quota,
            total_requests,
            counts: *counts,
            expected_successes: quota,
            expected_rejections: rejections,
            success_accuracy,
            rejection_accuracy,
            overall_accuracy,
            passed: overall_accuracy > self.pass_threshold_pct,
            tolerance: ToleranceVerdict {
                min_success_count,
                min_rejection_count,
                success_within_tolerance: counts.true_admit >= min_success_count,
                rejection_within_tolerance: counts.true_throttle >= min_rejection_count,
            },
        })
    }
}
