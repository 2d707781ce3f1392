//! # Bring-up and tear-down reports.
//!
//! A [`BringUpReport`] is produced once, at the end of a bring-up run, and never
//! mutated afterwards. Probe and action failures handled by the recovery loop only
//! surface here as attempt counts and the last failure reason.

use std::time::Duration;

use crate::error::{StopError, UnitFailed};
use crate::state::UnitState;

/// Final outcome of one unit within a bring-up run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitReport {
    /// Unit name.
    pub name: String,
    /// State at the end of the run (`Healthy`, `Failed` or `Stopped`).
    pub state: UnitState,
    /// Start attempts made during this run (0 if the unit was not started).
    pub attempts: u32,
    /// Time spent on this unit, from its first action to its terminal state.
    pub elapsed: Duration,
    /// Last probe or action failure observed, if any.
    pub last_failure: Option<String>,
    /// Group member that held the unit's exclusion group, if the unit was left
    /// `Stopped` because of it.
    pub excluded_by: Option<String>,
}

impl UnitReport {
    /// True if the unit was not started because an alternative held its group.
    pub fn is_excluded(&self) -> bool {
        self.excluded_by.is_some()
    }
}

/// Outcome of a whole bring-up run, in plan order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BringUpReport {
    /// Per-unit outcomes, in bring-up order.
    pub units: Vec<UnitReport>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
    /// True if the overall deadline cut the run short, including a backoff that
    /// would have ended past it.
    pub deadline_hit: bool,
    /// Units stopped after the run because a unit they depend on failed.
    pub rolled_back: Vec<String>,
}

impl BringUpReport {
    /// True if every unit ended `Healthy`, apart from alternatives left out by their
    /// exclusion group.
    pub fn is_healthy(&self) -> bool {
        self.units
            .iter()
            .all(|u| u.state == UnitState::Healthy || u.is_excluded())
    }

    /// Units left `Stopped` because another member held their exclusion group.
    pub fn excluded(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.is_excluded())
    }

    /// Units that ended `Failed`, in plan order.
    pub fn failed(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.state == UnitState::Failed)
    }

    /// Outcome for `name`.
    pub fn get(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Number of units that ended `Healthy`.
    pub fn healthy_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Healthy)
            .count()
    }

    /// Turns a report with a failed unit into an error naming the first one.
    pub fn into_result(self) -> Result<Self, UnitFailed> {
        let err = self.failed().next().map(|u| UnitFailed {
            unit: u.name.clone(),
            attempts: u.attempts,
            reason: u.last_failure.clone().unwrap_or_default(),
        });
        match err {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// One-line summary, e.g. `3/4 healthy, 1 failed`.
    pub fn summary(&self) -> String {
        let failed = self.failed().count();
        let mut out = format!("{}/{} healthy", self.healthy_count(), self.units.len());
        if failed > 0 {
            out.push_str(&format!(", {failed} failed"));
        }
        let excluded = self.excluded().count();
        if excluded > 0 {
            out.push_str(&format!(", {excluded} excluded"));
        }
        if !self.rolled_back.is_empty() {
            out.push_str(&format!(", {} rolled back", self.rolled_back.len()));
        }
        if self.deadline_hit {
            out.push_str(", deadline hit");
        }
        out
    }
}

/// Outcome of a tear-down run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TearDownReport {
    /// Units in the order their stop action was attempted.
    pub visited: Vec<String>,
    /// Stops that failed; tear-down continues past them.
    pub failures: Vec<StopError>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl TearDownReport {
    /// True if every unit stopped cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, state: UnitState, attempts: u32) -> UnitReport {
        UnitReport {
            name: name.into(),
            state,
            attempts,
            elapsed: Duration::ZERO,
            last_failure: (state == UnitState::Failed).then(|| "probe timed out after 5s".into()),
            excluded_by: None,
        }
    }

    #[test]
    fn into_result_names_first_failed_unit() {
        let report = BringUpReport {
            units: vec![
                unit("pipewire", UnitState::Healthy, 1),
                unit("wireplumber", UnitState::Failed, 3),
                unit("pipewire-pulse", UnitState::Failed, 0),
            ],
            ..BringUpReport::default()
        };
        assert!(!report.is_healthy());
        assert_eq!(report.summary(), "1/3 healthy, 2 failed");

        let err = report.into_result().unwrap_err();
        assert_eq!(err.unit, "wireplumber");
        assert_eq!(err.attempts, 3);
        assert_eq!(err.reason, "probe timed out after 5s");
    }

    #[test]
    fn healthy_report_passes_through() {
        let report = BringUpReport {
            units: vec![unit("bluetooth", UnitState::Healthy, 2)],
            ..BringUpReport::default()
        };
        assert!(report.is_healthy());
        assert_eq!(report.get("bluetooth").map(|u| u.attempts), Some(2));
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn excluded_alternative_keeps_report_healthy() {
        let mut pulseaudio = unit("pulseaudio", UnitState::Stopped, 0);
        pulseaudio.excluded_by = Some("pipewire-pulse".into());
        let report = BringUpReport {
            units: vec![unit("pipewire-pulse", UnitState::Healthy, 1), pulseaudio],
            ..BringUpReport::default()
        };

        assert!(report.is_healthy());
        assert_eq!(report.failed().count(), 0);
        let excluded: Vec<&str> = report.excluded().map(|u| u.name.as_str()).collect();
        assert_eq!(excluded, ["pulseaudio"]);
        assert_eq!(report.summary(), "1/2 healthy, 1 excluded");
        assert!(report.into_result().is_ok());
    }
}
