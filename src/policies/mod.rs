//! Retry and failure policies.
//!
//! ## Contents
//! - [`RetryPolicy`]   how often a unit is started and how long to wait in between
//! - [`ResetMode`]     when a unit's runtime state is cleared before a retry
//! - [`FailurePolicy`] what the controller does with the stack once a unit fails
//!
//! ## Defaults
//! - `RetryPolicy::default()` → 3 attempts, 1s base, ×2, 30s cap, reset after the first retry.
//! - `FailurePolicy::Isolate`.

mod failure;
mod retry;

pub use failure::FailurePolicy;
pub use retry::{ResetMode, RetryPolicy};
