//! # Stack-wide failure policy.
//!
//! Once the recovery loop declares a unit `Failed`, the controller decides what
//! happens to the rest of the stack. Nothing is rolled back silently: every unit
//! stopped because of this policy is reported as rolled back.

use serde::{Deserialize, Serialize};

/// What the controller does with the rest of the stack after a unit fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep healthy independent branches running; stop running units that
    /// (transitively) depend on a failed unit.
    #[default]
    Isolate,
    /// Tear the whole stack down if any unit failed.
    TearDown,
}
