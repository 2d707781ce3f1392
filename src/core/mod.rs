//! Runtime core: orchestration and lifecycle.
//!
//! The public API of this module is [`StackController`] and its [`StackBuilder`].
//!
//! Internal modules:
//! - [`runner`]: one probe or one action, bounded by a timeout, with a child token;
//! - [`reset`]: clearing a unit's declared runtime state;
//! - [`table`]: the shared unit state table;
//! - [`recovery`]: per-unit start / probe / retry state machine (the only writer of states);
//! - [`sequencer`]: batch-by-batch bring-up over the plan;
//! - [`controller`]: stack operations, failure policy, subscriber listener;
//! - [`shutdown`]: termination signal handling.

mod builder;
mod controller;
mod recovery;
mod reset;
mod runner;
mod sequencer;
mod shutdown;
mod table;

pub use builder::StackBuilder;
pub use controller::StackController;
pub use reset::reset_state;
pub use runner::{run_action, run_probe};
pub use shutdown::wait_for_shutdown_signal;
