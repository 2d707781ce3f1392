//! # stackvisor
//!
//! **Stackvisor** brings up a stack of mutually dependent OS services in
//! dependency order, waits for each one to prove itself healthy, retries with
//! bounded backoff (optionally clearing runtime state first), and reports the
//! outcome. It was built to keep an embedded audio host's daemons (audio server,
//! session manager, legacy-protocol bridge, Bluetooth) alive, but treats every
//! service as an opaque [`Unit`].
//!
//! ## Architecture
//! ```text
//!     UnitSpec            UnitSpec             UnitSpec
//!   (pipewire)       (wireplumber→pipewire)   (bluetooth)
//!        └──────────────────┬───────────────────┘
//!                           ▼
//!             StackBuilder::build()
//!               └─► DependencyGraph::load ─► StackPlan   (or ConfigError)
//!                           ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StackController                                             │
//! │  - UnitTable (name → UnitState, one RwLock)                  │
//! │  - Bus (broadcast events) ─► listener ─► SubscriberSet       │
//! └──────┬───────────────────────────────────────────────────────┘
//!        ▼  bring_up()
//!   Sequencer: batch 0 ─► batch 1 ─► ...
//!        │      ├─► RecoveryActor(pipewire)    start ─► probe ─► retry ...
//!        │      └─► RecoveryActor(bluetooth)   start ─► probe ─► ...
//!        ▼
//!   FailurePolicy (Isolate / TearDown) ─► BringUpReport
//! ```
//!
//! ### Unit lifecycle
//! ```text
//! Stopped ─► Starting ─► Healthy
//!               │  ▲
//!               ▼  │ backoff (+ reset from the second retry on)
//!            Degraded ─► Failed (attempts exhausted or deadline)
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types                                   |
//! |-------------------|-----------------------------------------------------------|---------------------------------------------|
//! | **Units**         | Services as closures or argv commands                     | [`Unit`], [`UnitFn`], [`CommandUnit`]       |
//! | **Planning**      | Validation and layered topological sort                   | [`DependencyGraph`], [`StackPlan`]          |
//! | **Policies**      | Bounded retries, backoff, reset, stack-wide failure policy | [`RetryPolicy`], [`ResetMode`], [`FailurePolicy`] |
//! | **Control**       | Bring-up, tear-down, status                               | [`StackController`], [`StackBuilder`]       |
//! | **Reports**       | Per-unit outcome of a run                                 | [`BringUpReport`], [`TearDownReport`]       |
//! | **Events**        | Runtime events and subscribers                            | [`Event`], [`Subscribe`]                    |
//! | **Configuration** | Runtime knobs and TOML stack files                        | [`StackConfig`], [`StackFile`]              |
//!
//! ## Optional features
//! - `logging` (default): the built-in [`LogWriter`] subscriber, rendering events as `tracing` records.
//! - `cli`: the `stackvisor` binary.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use stackvisor::{ProbeFailure, StackBuilder, StackConfig, UnitFn, UnitSpec, UnitState};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = StackConfig::default();
//!     cfg.retry.base_delay = Duration::from_millis(10);
//!
//!     let core = UnitFn::new("pipewire")
//!         .on_probe(|_ctx: CancellationToken| async { Ok::<_, ProbeFailure>(()) })
//!         .arc();
//!     let session = UnitFn::new("wireplumber").arc();
//!
//!     let stack = StackBuilder::new(cfg)
//!         .unit(UnitSpec::new(core))
//!         .unit(UnitSpec::new(session).depends_on(["pipewire"]))
//!         .build()?;
//!
//!     let report = stack.bring_up().await;
//!     assert!(report.is_healthy());
//!     assert_eq!(stack.status().await["wireplumber"], UnitState::Healthy);
//!
//!     let down = stack.tear_down().await;
//!     assert_eq!(down.visited, ["wireplumber", "pipewire"]);
//!     stack.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod plan;
mod policies;
mod report;
mod state;
mod subscribers;
mod units;

// ---- Public re-exports ----

pub use config::{ProbeEntry, RetryOverride, StackConfig, StackFile, UnitEntry};
pub use core::{
    StackBuilder, StackController, reset_state, run_action, run_probe, wait_for_shutdown_signal,
};
pub use error::{ActionError, ConfigError, LoadError, ProbeFailure, ResetError, StopError, UnitFailed};
pub use events::{Bus, Event, EventKind};
pub use plan::{DependencyGraph, StackPlan};
pub use policies::{FailurePolicy, ResetMode, RetryPolicy};
pub use report::{BringUpReport, TearDownReport, UnitReport};
pub use state::UnitState;
pub use subscribers::{Subscribe, SubscriberSet};
pub use units::{Action, CommandUnit, ProbeCheck, Unit, UnitFn, UnitKind, UnitRef, UnitSpec};

// Built-in tracing renderer for runtime events.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
