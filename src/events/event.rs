//! # Runtime events emitted by the controller, sequencer and recovery loops.
//!
//! The [`EventKind`] enum classifies events into four groups:
//! - **Run events**: bring-up / tear-down boundaries and deadline expiry
//! - **Unit lifecycle events**: starting, probe outcomes, backoff, reset, terminal states
//! - **Tear-down events**: stop outcomes and rollbacks
//! - **Subscriber events**: overflow and panic reports from the fan-out
//!
//! The [`Event`] struct carries optional metadata such as unit name, attempt,
//! delay and reason.
//!
//! `seq` is process-wide and strictly increasing, so events from concurrent
//! recovery loops can be put back in publication order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use stackvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::BackoffScheduled)
//!     .with_unit("wireplumber")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(2))
//!     .with_reason("probe timed out after 5s");
//!
//! assert_eq!(ev.kind, EventKind::BackoffScheduled);
//! assert_eq!(ev.unit.as_deref(), Some("wireplumber"));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::state::UnitState;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Run events ===
    /// A bring-up run started. Sets `count` (number of units).
    BringUpStarted,
    /// A batch is about to start. Sets `batch`, `count`.
    BatchStarted,
    /// A bring-up run finished. Sets `count` (healthy units), `reason` (summary).
    BringUpFinished,
    /// A tear-down run finished. Sets `count` (stop failures).
    TearDownFinished,
    /// The overall deadline of a run expired. Sets `timeout_ms`.
    DeadlineExceeded,
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    // === Unit lifecycle ===
    /// Start action is being invoked. Sets `unit`, `attempt`.
    UnitStarting,
    /// An already-running unit is being re-probed instead of restarted. Sets `unit`.
    UnitReprobed,
    /// Start or reset action failed. Sets `unit`, `attempt`, `reason`.
    ActionFailed,
    /// Probe answered "not healthy". Sets `unit`, `attempt`, `reason`.
    ProbeUnhealthy,
    /// Probe did not answer in time. Sets `unit`, `attempt`, `timeout_ms`.
    ProbeTimedOut,
    /// Unit became healthy. Sets `unit`, `attempt`.
    UnitHealthy,
    /// Unit failed an attempt with retries left. Sets `unit`, `attempt`, `reason`.
    UnitDegraded,
    /// Next attempt scheduled. Sets `unit`, `attempt` (the failed one), `delay_ms`, `reason`.
    BackoffScheduled,
    /// Runtime state cleared before a retry. Sets `unit`, `attempt` (the upcoming one).
    ResetPerformed,
    /// Clearing runtime state failed. Sets `unit`, `attempt`, `reason`.
    ResetFailed,
    /// Unit reached `Failed`. Sets `unit`, `attempt`, `reason`.
    UnitFailed,
    /// Unit was not started (prerequisite failed, exclusion group held, or deadline).
    /// Sets `unit`, `reason`.
    UnitSkipped,

    // === Tear-down ===
    /// Unit stopped. Sets `unit`.
    UnitStopped,
    /// Stop action failed. Sets `unit`, `reason`.
    StopFailed,
    /// Running unit stopped because a unit it depends on failed. Sets `unit`, `reason`.
    UnitRolledBack,

    // === Subscriber events ===
    /// Subscriber panicked during event processing. Sets `unit` (subscriber name), `reason`.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed). Sets `unit`, `reason`.
    SubscriberOverflow,
}

/// One runtime event. Which optional fields are set depends on [`EventKind`].
#[derive(Clone, Debug)]
pub struct Event {
    /// Publication order.
    pub seq: u64,
    /// When the event was created.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the unit, if applicable.
    pub unit: Option<Arc<str>>,
    /// Attempt number (starting from 1).
    pub attempt: Option<u32>,
    /// Probe timeout or deadline in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Backoff delay before next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, summaries, overflow details).
    pub reason: Option<Arc<str>>,
    /// Unit state after the event, if it caused a transition.
    pub state: Option<UnitState>,
    /// Batch index.
    pub batch: Option<u32>,
    /// Generic counter (units in a run or batch, failures, ...).
    pub count: Option<u32>,
}

impl Event {
    /// Creates an event stamped with the next `seq` and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            unit: None,
            attempt: None,
            timeout_ms: None,
            delay_ms: None,
            reason: None,
            state: None,
            batch: None,
            count: None,
        }
    }

    /// Attaches a unit name.
    #[inline]
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches the upcoming backoff delay.
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a reason or summary.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the resulting unit state.
    #[inline]
    pub fn with_state(mut self, state: UnitState) -> Self {
        self.state = Some(state);
        self
    }

    /// Attaches a batch index.
    #[inline]
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = Some(u32::try_from(batch).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(u32::try_from(count).unwrap_or(u32::MAX));
        self
    }

    /// `SubscriberOverflow` for `subscriber`.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_unit(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// `SubscriberPanicked` for `subscriber`.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_unit(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the subscriber fan-out itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::UnitStarting);
        let b = Event::new(EventKind::UnitHealthy);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_are_compacted() {
        let ev =
            Event::new(EventKind::DeadlineExceeded).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }
}
