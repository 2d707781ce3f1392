//! Error types used by the stackvisor runtime and unit actions.
//!
//! - [`ConfigError`]: the declared unit set is invalid; raised before any unit is touched.
//! - [`ActionError`]: a start/stop/reset action could not be carried out.
//! - [`ProbeFailure`]: a health probe reported unhealthy or did not answer in time.
//! - [`ResetError`]: clearing a unit's runtime state failed.
//! - [`UnitFailed`]: a unit exhausted its retry policy (terminal).
//! - [`StopError`]: a unit could not be stopped during tear-down.
//! - [`LoadError`]: a stack file could not be read or parsed.
//!
//! `ProbeFailure` and `ActionError` are recoverable: the recovery loop consumes them and
//! only their count and last message surface in the [`BringUpReport`](crate::BringUpReport).
//! Every enum provides `as_label` for logs/metrics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::units::Action;

/// # Invalid stack definition.
///
/// Detected while building the plan. Never retried.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The dependency relation contains a cycle.
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// Units forming the cycle; the first name is repeated at the end.
        path: Vec<String>,
    },

    /// A unit depends on a name that is not declared.
    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency {
        /// The declaring unit.
        unit: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two units share one name.
    #[error("unit '{unit}' is declared more than once")]
    DuplicateUnit {
        /// The duplicated name.
        unit: String,
    },

    /// Two units claim the same runtime state path.
    #[error("state path {path:?} is claimed by both '{first}' and '{second}'")]
    SharedStatePath {
        /// The contested path.
        path: PathBuf,
        /// Unit that declared it first.
        first: String,
        /// Unit that declared it again.
        second: String,
    },

    /// A retry policy violates its invariants.
    #[error("unit '{unit}' has an invalid retry policy: {reason}")]
    InvalidPolicy {
        /// The unit carrying the policy.
        unit: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Cycle { .. } => "config_cycle",
            ConfigError::UnknownDependency { .. } => "config_unknown_dependency",
            ConfigError::DuplicateUnit { .. } => "config_duplicate_unit",
            ConfigError::SharedStatePath { .. } => "config_shared_state_path",
            ConfigError::InvalidPolicy { .. } => "config_invalid_policy",
        }
    }
}

/// # A unit action could not be carried out.
///
/// For retry purposes this is treated exactly like a failed probe.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The action ran and reported failure.
    #[error("{action} failed: {reason}")]
    Failed {
        /// Which action.
        action: Action,
        /// Failure message (exit status, stderr excerpt, ...).
        reason: String,
    },

    /// The action could not be invoked at all.
    #[error("{action} could not be invoked: {reason}")]
    Spawn {
        /// Which action.
        action: Action,
        /// Why invocation failed.
        reason: String,
    },

    /// The action did not finish before its time budget ran out.
    #[error("{action} timed out after {timeout:?}")]
    TimedOut {
        /// Which action.
        action: Action,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The overall operation deadline expired before the action could run.
    #[error("{action} skipped: deadline exceeded")]
    DeadlineExceeded {
        /// Which action.
        action: Action,
    },
}

impl ActionError {
    /// Convenience constructor for [`ActionError::Failed`].
    pub fn failed(action: Action, reason: impl Into<String>) -> Self {
        ActionError::Failed {
            action,
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Failed { .. } => "action_failed",
            ActionError::Spawn { .. } => "action_spawn",
            ActionError::TimedOut { .. } => "action_timeout",
            ActionError::DeadlineExceeded { .. } => "action_deadline",
        }
    }

    /// The action this error belongs to.
    pub fn action(&self) -> Action {
        match self {
            ActionError::Failed { action, .. }
            | ActionError::Spawn { action, .. }
            | ActionError::TimedOut { action, .. }
            | ActionError::DeadlineExceeded { action } => *action,
        }
    }
}

/// # A health probe did not report healthy.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The probe answered, and the answer was "not healthy".
    #[error("unhealthy: {reason}")]
    Unhealthy {
        /// What the probe observed.
        reason: String,
    },

    /// The probe did not answer within its timeout.
    ///
    /// Kept apart from `Unhealthy`: a hung probe usually means a stuck unit rather
    /// than one that is still coming up.
    #[error("probe timed out after {timeout:?}")]
    TimedOut {
        /// The probe timeout (or the remaining deadline, if shorter).
        timeout: Duration,
    },
}

impl ProbeFailure {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProbeFailure::Unhealthy { .. } => "probe_unhealthy",
            ProbeFailure::TimedOut { .. } => "probe_timeout",
        }
    }
}

/// # Clearing a unit's runtime state failed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ResetError {
    /// A declared state path exists but could not be removed.
    #[error("cannot remove {path:?}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The unit's own reset action failed.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// No unit of that name is part of the stack.
    #[error("unknown unit '{unit}'")]
    UnknownUnit {
        /// The requested name.
        unit: String,
    },
}

impl ResetError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ResetError::Io { .. } => "reset_io",
            ResetError::Action(_) => "reset_action",
            ResetError::UnknownUnit { .. } => "reset_unknown_unit",
        }
    }
}

/// # A unit reached the terminal `Failed` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit '{unit}' failed after {attempts} attempt(s): {reason}")]
pub struct UnitFailed {
    /// Unit name.
    pub unit: String,
    /// Start attempts made (0 if never started).
    pub attempts: u32,
    /// Last observed failure.
    pub reason: String,
}

/// # A unit could not be stopped during tear-down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unit '{unit}': {error}")]
pub struct StopError {
    /// Unit name.
    pub unit: String,
    /// What went wrong.
    #[source]
    pub error: ActionError,
}

/// # A stack file could not be loaded.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LoadError {
    /// The file could not be read.
    #[error("cannot read {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for a stack definition.
    #[error("invalid stack file: {0}")]
    Parse(#[from] toml::de::Error),

    /// An entry is syntactically valid but cannot be turned into a unit.
    #[error("unit '{unit}': {reason}")]
    Invalid {
        /// Offending entry.
        unit: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The resulting unit set is not a valid stack.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a single start attempt, as seen by the recovery loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Probe(#[from] ProbeFailure),
}

impl AttemptError {
    pub(crate) fn as_label(&self) -> &'static str {
        match self {
            AttemptError::Action(e) => e.as_label(),
            AttemptError::Probe(e) => e.as_label(),
        }
    }
}
