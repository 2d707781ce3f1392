//! # Unit lifecycle states.
//!
//! ```text
//!            start                probe ok
//! Stopped ──────────► Starting ─────────────► Healthy
//!    ▲                   │  ▲                    │
//!    │       probe fails │  │ backoff elapsed,   │ re-probe fails
//!    │   (retries left)  ▼  │ restart            ▼
//!    │                Degraded ─────────────► Starting
//!    │                   │
//!    │                   │ retries exhausted / deadline
//!    │                   ▼
//!    └──── stop ────── Failed
//! ```
//!
//! Only the recovery loop moves a unit between states; everything else reads them.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of one managed unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Not running (initial state, or after an explicit stop).
    #[default]
    Stopped,
    /// Start action invoked; waiting for the first healthy probe.
    Starting,
    /// Last probe succeeded.
    Healthy,
    /// A probe or action failed; a retry is scheduled.
    Degraded,
    /// Retries exhausted (or never started because a prerequisite failed). Terminal.
    Failed,
}

impl UnitState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Stopped => "stopped",
            UnitState::Starting => "starting",
            UnitState::Healthy => "healthy",
            UnitState::Degraded => "degraded",
            UnitState::Failed => "failed",
        }
    }

    /// True for states a bring-up run may end in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Healthy | UnitState::Failed | UnitState::Stopped)
    }

    /// True while a bring-up is still working on the unit.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, UnitState::Starting | UnitState::Degraded)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
