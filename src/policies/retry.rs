//! # Retry policy for unit bring-up.
//!
//! [`RetryPolicy`] bounds how many times a unit is started and how long the
//! recovery loop waits between attempts. It is parameterized by:
//! - [`RetryPolicy::max_attempts`] total start attempts (first one included);
//! - [`RetryPolicy::base_delay`] the delay after the first failure;
//! - [`RetryPolicy::multiplier`] the multiplicative growth factor;
//! - [`RetryPolicy::max_delay`] the delay cap;
//! - [`RetryPolicy::reset`] when the unit's state is reset before a retry.
//!
//! The delay after failed attempt `n` (1-based) is `base × multiplier^(n-1)`,
//! clamped to `max_delay`. With `multiplier >= 1.0` the sequence never decreases.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use stackvisor::{ResetMode, RetryPolicy};
//!
//! let retry = RetryPolicy {
//!     max_attempts: 5,
//!     base_delay: Duration::from_secs(1),
//!     multiplier: 2.0,
//!     max_delay: Duration::from_secs(5),
//!     reset: ResetMode::Never,
//! };
//!
//! assert_eq!(retry.delay(1), Duration::from_secs(1));
//! assert_eq!(retry.delay(2), Duration::from_secs(2));
//! assert_eq!(retry.delay(3), Duration::from_secs(4));
//! assert_eq!(retry.delay(4), Duration::from_secs(5)); // capped
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::serde_millis;

/// When the recovery loop resets a unit's runtime state before retrying it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Retries are plain restarts.
    Never,
    /// The first retry is a plain restart; every later retry resets first.
    ///
    /// A single failed probe is often just a slow start, so it does not earn a reset.
    #[default]
    AfterFirstRetry,
    /// Every retry resets first.
    BeforeEveryRetry,
}

/// Bounded retry policy shared by all units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total start attempts, including the first (must be `>= 1`).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(rename = "base_delay_ms", with = "serde_millis")]
    pub base_delay: Duration,
    /// Growth factor applied per failed attempt (must be `>= 1.0`).
    pub multiplier: f64,
    /// Upper bound for any single delay (must be `>= base_delay`).
    #[serde(rename = "max_delay_ms", with = "serde_millis")]
    pub max_delay: Duration,
    /// Reset-before-retry behavior.
    pub reset: ResetMode,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `max_attempts = 3`;
    /// - `base_delay = 1s`, `multiplier = 2.0`, `max_delay = 30s`;
    /// - `reset = ResetMode::AfterFirstRetry`.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            reset: ResetMode::default(),
        }
    }
}

impl RetryPolicy {
    /// Returns a policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Computes the delay to wait after failed attempt `attempt` (1-based).
    ///
    /// Attempt `0` is treated as `1`. Overflow and non-finite results clamp to `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Sum of the delays that precede attempt `attempt` (i.e. after attempts `1..attempt`).
    pub fn total_delay_before(&self, attempt: u32) -> Duration {
        (1..attempt).map(|n| self.delay(n)).sum()
    }

    /// Returns `true` if a reset must run before attempt `attempt` (1-based).
    ///
    /// The first attempt never resets.
    pub fn resets_before(&self, attempt: u32) -> bool {
        match self.reset {
            ResetMode::Never => false,
            ResetMode::BeforeEveryRetry => attempt >= 2,
            ResetMode::AfterFirstRetry => attempt >= 3,
        }
    }

    /// Checks the policy invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(format!(
                "max_delay {:?} is below base_delay {:?}",
                self.max_delay, self.base_delay
            ));
        }
        Ok(())
    }
}
