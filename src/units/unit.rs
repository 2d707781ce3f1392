//! # Managed unit abstraction.
//!
//! A [`Unit`] is one controllable OS service or action: something that can be
//! started, stopped, probed for health and (optionally) reset. The runtime treats
//! units as opaque; how an action is carried out (systemctl, a D-Bus call, a
//! closure in tests) is up to the implementor.
//!
//! Every action receives a [`CancellationToken`]. It is cancelled when the action's
//! time budget runs out or the operation deadline expires; implementations should
//! return promptly once it fires.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use stackvisor::{ActionError, ProbeFailure, Unit};
//!
//! struct Bluetooth;
//!
//! #[async_trait]
//! impl Unit for Bluetooth {
//!     fn name(&self) -> &str { "bluetooth" }
//!
//!     async fn start(&self, _ctx: CancellationToken) -> Result<(), ActionError> { Ok(()) }
//!     async fn stop(&self, _ctx: CancellationToken) -> Result<(), ActionError> { Ok(()) }
//!
//!     async fn probe(&self, _ctx: CancellationToken) -> Result<(), ProbeFailure> {
//!         Err(ProbeFailure::Unhealthy { reason: "adapter powered off".into() })
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ActionError, ProbeFailure};

/// Shared handle to a unit.
pub type UnitRef = Arc<dyn Unit>;

/// What sort of OS object a unit represents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Long-running service; healthy once its probe succeeds.
    #[default]
    Daemon,
    /// One-off action (e.g. loading a module, powering an adapter). Once its start
    /// action succeeded, later attempts of the same run only probe, unless a reset
    /// ran in between.
    Oneshot,
    /// Socket listener; healthy once the socket is accepting.
    Socket,
}

impl UnitKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Daemon => "daemon",
            UnitKind::Oneshot => "oneshot",
            UnitKind::Socket => "socket",
        }
    }
}

/// The actions a unit exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Bring the unit up.
    Start,
    /// Bring the unit down.
    Stop,
    /// Clear the unit's runtime state.
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reset => "reset",
        })
    }
}

/// # A controllable OS-level service.
///
/// Probes must be read-only from the stack's point of view; the runtime may call
/// them at any time and abandons them when they exceed their timeout.
#[async_trait]
pub trait Unit: Send + Sync + 'static {
    /// Stable unit name, unique within a stack.
    fn name(&self) -> &str;

    /// Kind of unit. Defaults to [`UnitKind::Daemon`].
    fn kind(&self) -> UnitKind {
        UnitKind::Daemon
    }

    /// Starts the unit. Must be safe to call on a unit that is already running.
    async fn start(&self, ctx: CancellationToken) -> Result<(), ActionError>;

    /// Stops the unit. Must be safe to call on a unit that is not running.
    async fn stop(&self, ctx: CancellationToken) -> Result<(), ActionError>;

    /// Checks whether the unit is healthy.
    async fn probe(&self, ctx: CancellationToken) -> Result<(), ProbeFailure>;

    /// Runs the unit's own reset hook, if any.
    ///
    /// Declared state paths are cleared by the runtime separately; this hook is for
    /// anything else (flushing a cache through a CLI, restarting a helper, ...).
    /// Must be idempotent. The default does nothing.
    async fn reset(&self, _ctx: CancellationToken) -> Result<(), ActionError> {
        Ok(())
    }
}
