//! Staged load profile: elapsed time → target concurrency.
//!
//! The profile does not drive anything. An external scheduler ramps real
//! concurrency toward each stage's target within that stage's window; this
//! module validates the shape and answers "which stage, which phase, what
//! target" for any elapsed time so classification can be phase-aware.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RlvError};

/// One stage as written in config: `{ duration = "30s", target = 500 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub duration: String,
    pub target: u32,
}

impl StageSpec {
    #[must_use]
    pub fn new(duration: &str, target: u32) -> Self {
        Self {
            duration: duration.to_string(),
            target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStage {
    pub duration: Duration,
    pub target: u32,
}

/// What a stage does relative to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    RampUp,
    /// The rising stage that reaches the profile's peak (never the first stage).
    Spike,
    Hold,
    /// Falling to a non-zero target.
    Recovery,
    /// Falling to zero.
    RampDown,
}

impl StagePhase {
    pub const ALL: [Self; 5] = [
        Self::RampUp,
        Self::Spike,
        Self::Hold,
        Self::Recovery,
        Self::RampDown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RampUp => "ramp_up",
            Self::Spike => "spike",
            Self::Hold => "hold",
            Self::Recovery => "recovery",
            Self::RampDown => "ramp_down",
        }
    }
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, validated, immutable sequence of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    stages: Vec<LoadStage>,
}

impl LoadProfile {
    /// Valid iff non-empty, every stage has a strictly positive duration and
    /// the stages sum to a representable `Duration`. Targets are unsigned, so
    /// non-negative by construction.
    pub fn new(stages: Vec<LoadStage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(RlvError::InvalidProfile {
                details: "profile must contain at least one stage".to_string(),
            });
        }
        if let Some(pos) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(RlvError::InvalidProfile {
                details: format!("stage {} has zero duration", pos + 1),
            });
        }
        stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .ok_or_else(|| RlvError::InvalidProfile {
                details: "total profile duration overflows".to_string(),
            })?;
        Ok(Self { stages })
    }

    /// Build from config specs, parsing each duration.
    pub fn from_specs(specs: &[StageSpec]) -> Result<Self> {
        let stages = specs
            .iter()
            .map(|spec| {
                Ok(LoadStage {
                    duration: parse_duration(&spec.duration)?,
                    target: spec.target,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(stages)
    }

    /// 100 users for 1m, spike to 500 for 30s, recover to 100 for 1m, ramp down over 30s.
    #[must_use]
    pub fn default_spike_specs() -> Vec<StageSpec> {
        vec![
            StageSpec::new("1m", 100),
            StageSpec::new("30s", 500),
            StageSpec::new("1m", 100),
            StageSpec::new("30s", 0),
        ]
    }

    #[must_use]
    pub fn stages(&self) -> &[LoadStage] {
        &self.stages
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    #[must_use]
    pub fn peak_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Indices of stages whose target equals the previous stage's target.
    #[must_use]
    pub fn no_op_stages(&self) -> Vec<usize> {
        (1..self.stages.len())
            .filter(|&i| self.stages[i].target == self.stages[i - 1].target)
            .collect()
    }

    /// Start offset of stage `index`.
    #[must_use]
    pub fn stage_start(&self, index: usize) -> Duration {
        self.stages.iter().take(index).map(|s| s.duration).sum()
    }

    /// Stage active at `elapsed`; `None` once the profile has ended.
    #[must_use]
    pub fn stage_at(&self, elapsed: Duration) -> Option<(usize, &LoadStage)> {
        let mut end = Duration::ZERO;
        for (i, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return Some((i, stage));
            }
        }
        None
    }

    #[must_use]
    pub fn phase_of(&self, index: usize) -> Option<StagePhase> {
        let stage = self.stages.get(index)?;
        let previous = if index == 0 {
            0
        } else {
            self.stages[index - 1].target
        };
        let phase = if stage.target > previous {
            if index > 0 && stage.target == self.peak_target() {
                StagePhase::Spike
            } else {
                StagePhase::RampUp
            }
        } else if stage.target == previous {
            StagePhase::Hold
        } else if stage.target == 0 {
            StagePhase::RampDown
        } else {
            StagePhase::Recovery
        };
        Some(phase)
    }

    #[must_use]
    pub fn phase_at(&self, elapsed: Duration) -> Option<StagePhase> {
        self.stage_at(elapsed).and_then(|(i, _)| self.phase_of(i))
    }

    /// Target concurrency at `elapsed`, ramping linearly from the previous
    /// stage's target (0 before the first stage).
    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> Option<f64> {
        let (index, stage) = self.stage_at(elapsed)?;
        let from = if index == 0 {
            0.0
        } else {
            f64::from(self.stages[index - 1].target)
        };
        let to = f64::from(stage.target);
        let into = (elapsed - self.stage_start(index)).as_secs_f64();
        let frac = into / stage.duration.as_secs_f64();
        Some((to - from).mul_add(frac, from))
    }

    /// `[start, end)` of the first spike stage, if the profile has one.
    #[must_use]
    pub fn spike_window(&self) -> Option<(Duration, Duration)> {
        let index = (0..self.stages.len()).find(|&i| self.phase_of(i) == Some(StagePhase::Spike))?;
        let start = self.stage_start(index);
        Some((start, start + self.stages[index].duration))
    }
}

/// Parse k6-style durations: `"1m"`, `"30s"`, `"1m30s"`, `"500ms"`, `"1.5h"`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    let invalid = |details: &str| RlvError::InvalidProfile {
        details: format!("duration {raw:?}: {details}"),
    };
    if s.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing unit (ms, s, m, h)"))?;
        if number_end == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        let after = &rest[number_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let secs = match &after[..unit_end] {
            "ms" => value / 1_000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3_600.0,
            other => return Err(invalid(&format!("unknown unit {other:?}"))),
        };
        let step = Duration::try_from_secs_f64(secs).map_err(|_| invalid("out of range"))?;
        total = total
            .checked_add(step)
            .ok_or_else(|| invalid("out of range"))?;
        rest = &after[unit_end..];
    }
    Ok(total)
}

/// Render a duration compactly, e.g. `1m30s`, `500ms`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    if millis > 0 {
        out.push_str(&format!("{millis}ms"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike_profile() -> LoadProfile {
        LoadProfile::from_specs(&LoadProfile::default_spike_specs()).unwrap()
    }

    #[test]
    fn parses_k6_durations() {
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_duration(" 1.5m ").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn malformed_durations_rejected() {
        for raw in ["", "30", "s", "10x", "1m30", "--1s"] {
            let err = parse_duration(raw).unwrap_err();
            assert!(
                matches!(err, RlvError::InvalidProfile { .. }),
                "{raw:?} gave {err}"
            );
        }
    }

    #[test]
    fn format_round_trips_common_durations() {
        for raw in ["1m", "30s", "1m30s", "500ms", "2h"] {
            assert_eq!(format_duration(parse_duration(raw).unwrap()), raw);
        }
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn default_profile_lasts_three_minutes() {
        let profile = spike_profile();
        assert_eq!(profile.total_duration(), Duration::from_secs(180));
        assert_eq!(profile.peak_target(), 500);
        assert!(profile.no_op_stages().is_empty());
    }

    #[test]
    fn zero_duration_stage_rejected() {
        let err = LoadProfile::new(vec![
            LoadStage {
                duration: Duration::from_secs(10),
                target: 5,
            },
            LoadStage {
                duration: Duration::ZERO,
                target: 10,
            },
        ])
        .unwrap_err();
        assert!(err.to_string().contains("stage 2"));
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_profile_rejected() {
        assert!(LoadProfile::new(Vec::new()).is_err());
    }

    #[test]
    fn oversized_duration_is_config_error() {
        let infinite = format!("1{}s", "0".repeat(400));
        for raw in ["9999999999999999h", infinite.as_str()] {
            let err = parse_duration(raw).unwrap_err();
            assert!(matches!(err, RlvError::InvalidProfile { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn overflowing_profile_total_rejected() {
        let specs = [
            StageSpec::new("5000000000000000h", 10),
            StageSpec::new("5000000000000000h", 20),
        ];
        let err = LoadProfile::from_specs(&specs).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("overflows"));

        let err = LoadProfile::new(vec![
            LoadStage {
                duration: Duration::MAX,
                target: 1,
            },
            LoadStage {
                duration: Duration::from_secs(1),
                target: 2,
            },
        ])
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn equal_consecutive_targets_are_legal_holds() {
        let profile = LoadProfile::from_specs(&[
            StageSpec::new("10s", 50),
            StageSpec::new("10s", 50),
        ])
        .unwrap();
        assert_eq!(profile.no_op_stages(), vec![1]);
        assert_eq!(profile.phase_of(1), Some(StagePhase::Hold));
    }

    #[test]
    fn phases_of_default_profile() {
        let profile = spike_profile();
        let phases: Vec<_> = (0..4).filter_map(|i| profile.phase_of(i)).collect();
        assert_eq!(
            phases,
            vec![
                StagePhase::RampUp,
                StagePhase::Spike,
                StagePhase::Recovery,
                StagePhase::RampDown
            ]
        );
        assert_eq!(profile.phase_of(4), None);
    }

    #[test]
    fn stage_lookup_by_elapsed() {
        let profile = spike_profile();
        assert_eq!(profile.stage_at(Duration::ZERO).unwrap().0, 0);
        assert_eq!(profile.stage_at(Duration::from_secs(59)).unwrap().0, 0);
        assert_eq!(profile.stage_at(Duration::from_secs(60)).unwrap().0, 1);
        assert_eq!(
            profile.phase_at(Duration::from_secs(75)),
            Some(StagePhase::Spike)
        );
        assert_eq!(profile.stage_at(Duration::from_secs(179)).unwrap().0, 3);
        assert!(profile.stage_at(Duration::from_secs(180)).is_none());
    }

    #[test]
    fn target_ramps_linearly() {
        let profile = spike_profile();
        assert!((profile.target_at(Duration::from_secs(30)).unwrap() - 50.0).abs() < 1e-9);
        assert!((profile.target_at(Duration::from_secs(75)).unwrap() - 300.0).abs() < 1e-9);
        assert!((profile.target_at(Duration::from_secs(165)).unwrap() - 50.0).abs() < 1e-9);
        assert!(profile.target_at(Duration::from_secs(500)).is_none());
    }

    #[test]
    fn spike_window_covers_spike_stage() {
        let profile = spike_profile();
        assert_eq!(
            profile.spike_window(),
            Some((Duration::from_secs(60), Duration::from_secs(90)))
        );
        let flat = LoadProfile::from_specs(&[StageSpec::new("1m", 10)]).unwrap();
        assert_eq!(flat.spike_window(), None);
    }
}
