//! # LogWriter: runtime events as tracing records
//!
//! Renders every [`Event`] as a structured `tracing` record under the
//! `stackvisor::events` target. Failures are logged at `warn`/`error`, progress at
//! `info`, chatty probe details at `debug`.
//!
//! ## Example output (fmt subscriber, compact)
//! ```text
//! INFO  stackvisor::events: starting unit=pipewire attempt=1
//! WARN  stackvisor::events: probe timed out unit=wireplumber attempt=1 timeout_ms=5000
//! INFO  stackvisor::events: backoff scheduled unit=wireplumber attempt=1 delay_ms=1000
//! INFO  stackvisor::events: state reset unit=wireplumber attempt=3
//! ERROR stackvisor::events: unit failed unit=wireplumber attempt=3 reason="..."
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event logging subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let unit = e.unit.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let attempt = e.attempt.unwrap_or(0);

        match e.kind {
            EventKind::BringUpStarted => {
                tracing::info!(target: "stackvisor::events", units = e.count, "bring-up started");
            }
            EventKind::BatchStarted => {
                tracing::debug!(target: "stackvisor::events", batch = e.batch, units = e.count, "batch started");
            }
            EventKind::BringUpFinished => {
                tracing::info!(target: "stackvisor::events", healthy = e.count, summary = reason, "bring-up finished");
            }
            EventKind::TearDownFinished => {
                tracing::info!(target: "stackvisor::events", stop_failures = e.count, "tear-down finished");
            }
            EventKind::DeadlineExceeded => {
                tracing::warn!(target: "stackvisor::events", deadline_ms = e.timeout_ms, "deadline exceeded");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "stackvisor::events", "shutdown requested");
            }
            EventKind::UnitStarting => {
                tracing::info!(target: "stackvisor::events", unit, attempt, "starting");
            }
            EventKind::UnitReprobed => {
                tracing::debug!(target: "stackvisor::events", unit, "re-probing running unit");
            }
            EventKind::ActionFailed => {
                tracing::warn!(target: "stackvisor::events", unit, attempt, reason, "action failed");
            }
            EventKind::ProbeUnhealthy => {
                tracing::debug!(target: "stackvisor::events", unit, attempt, reason, "probe unhealthy");
            }
            EventKind::ProbeTimedOut => {
                tracing::warn!(target: "stackvisor::events", unit, attempt, timeout_ms = e.timeout_ms, "probe timed out");
            }
            EventKind::UnitHealthy => {
                tracing::info!(target: "stackvisor::events", unit, attempt, "healthy");
            }
            EventKind::UnitDegraded => {
                tracing::warn!(target: "stackvisor::events", unit, attempt, reason, "degraded");
            }
            EventKind::BackoffScheduled => {
                tracing::info!(target: "stackvisor::events", unit, attempt, delay_ms = e.delay_ms, "backoff scheduled");
            }
            EventKind::ResetPerformed => {
                tracing::info!(target: "stackvisor::events", unit, attempt, "state reset");
            }
            EventKind::ResetFailed => {
                tracing::warn!(target: "stackvisor::events", unit, attempt, reason, "state reset failed");
            }
            EventKind::UnitFailed => {
                tracing::error!(target: "stackvisor::events", unit, attempt, reason, "unit failed");
            }
            EventKind::UnitSkipped => {
                tracing::warn!(target: "stackvisor::events", unit, reason, "unit not started");
            }
            EventKind::UnitStopped => {
                tracing::info!(target: "stackvisor::events", unit, "stopped");
            }
            EventKind::StopFailed => {
                tracing::warn!(target: "stackvisor::events", unit, reason, "stop failed");
            }
            EventKind::UnitRolledBack => {
                tracing::warn!(target: "stackvisor::events", unit, reason, "rolled back");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "stackvisor::events", subscriber = unit, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "stackvisor::events", subscriber = unit, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
