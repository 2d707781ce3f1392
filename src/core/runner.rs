//! # Bounded execution of one probe or one action.
//!
//! Every call a runtime makes into a [`Unit`] goes through here, so none of them can
//! run unbounded:
//!
//! ```text
//! run_probe(unit, timeout)        ─► Ok(())                    healthy
//!                                 ─► Err(Unhealthy(reason))    probe answered "no"
//!                                 ─► Err(TimedOut)             no answer in time
//!
//! run_action(unit, action, budget) ─► Ok(()) | Err(ActionError::{Failed,Spawn,TimedOut})
//! ```
//!
//! ## Rules
//! - Each call derives a **child token** from the caller's token; it is cancelled
//!   when the budget runs out, so the unit can abandon its work (and a command unit
//!   kills its child process).
//! - Cancelling the child never affects the parent.
//! - A zero budget still polls the unit once: a check that is ready immediately wins.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{ActionError, ProbeFailure};
use crate::units::{Action, Unit};

/// Runs `unit`'s probe, giving up after `timeout`.
pub async fn run_probe(
    unit: &dyn Unit,
    timeout: Duration,
    parent: &CancellationToken,
) -> Result<(), ProbeFailure> {
    let child = parent.child_token();

    match time::timeout(timeout, unit.probe(child.clone())).await {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            Err(ProbeFailure::TimedOut { timeout })
        }
    }
}

/// Runs one of `unit`'s actions, giving up after `budget`.
pub async fn run_action(
    unit: &dyn Unit,
    action: Action,
    budget: Duration,
    parent: &CancellationToken,
) -> Result<(), ActionError> {
    let child = parent.child_token();
    let fut = async {
        match action {
            Action::Start => unit.start(child.clone()).await,
            Action::Stop => unit.stop(child.clone()).await,
            Action::Reset => unit.reset(child.clone()).await,
        }
    };

    match time::timeout(budget, fut).await {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            Err(ActionError::TimedOut {
                action,
                timeout: budget,
            })
        }
    }
}
