//! # RecoveryActor: per-unit start / probe / retry state machine.
//!
//! Drives one unit from its current state to `Healthy` or `Failed`, applying the
//! unit's [`RetryPolicy`]:
//!
//! ```text
//! (already Healthy) ─► UnitReprobed ─► probe ─► ok ─────────────────────► Healthy
//!                                         └─► fail ─┐
//!                                                   ▼
//! loop attempt = 1..=max_attempts {
//!   ├─► [attempt ≥ 2 && policy says so] reset_state() ─► ResetPerformed / ResetFailed
//!   ├─► claim exclusion group ─► held? ─► Stopped, excluded (UnitSkipped)
//!   ├─► Starting, publish UnitStarting
//!   ├─► start() ─► probe() ─► ok ─► Healthy, publish UnitHealthy, done
//!   │                  └─► ActionFailed / ProbeUnhealthy / ProbeTimedOut
//!   ├─► attempts exhausted? ─► break
//!   ├─► Degraded, publish UnitDegraded
//!   ├─► backoff ends past the deadline? ─► Failed
//!   ├─► publish BackoffScheduled
//!   └─► sleep(delay)   (no lock held; aborted by cancellation)
//! }
//! Failed, publish UnitFailed
//! ```
//!
//! ## Rules
//! - Attempts of one unit run strictly one after another.
//! - Action and probe budgets are clipped to the time left before the deadline; once
//!   the deadline has passed no new attempt starts and the unit ends `Failed`.
//! - A failed start action counts exactly like a failed probe.
//! - A oneshot unit whose start action succeeded is only probed again on later
//!   attempts, unless a reset ran in between.
//! - A failed reset is reported and the attempt proceeds without it.
//! - A unit refused by its exclusion group is not a failure: it stays `Stopped` and
//!   its report names the member holding the group.
//! - All state writes of the runtime live in this module.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::StackConfig;
use crate::core::reset::reset_state;
use crate::core::runner::{run_action, run_probe};
use crate::core::table::UnitTable;
use crate::error::{ActionError, AttemptError, ProbeFailure, ResetError, StopError};
use crate::events::{Bus, Event, EventKind};
use crate::plan::DependencyGraph;
use crate::policies::RetryPolicy;
use crate::report::UnitReport;
use crate::state::UnitState;
use crate::units::{Action, UnitKind, UnitRef, UnitSpec};

/// A unit with its stack defaults and per-unit overrides resolved.
pub(crate) struct Managed {
    pub(crate) unit: UnitRef,
    pub(crate) retry: RetryPolicy,
    pub(crate) probe_timeout: Duration,
    pub(crate) action_timeout: Duration,
    pub(crate) state_paths: Vec<PathBuf>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) group: Option<String>,
    pub(crate) peers: Vec<String>,
}

impl Managed {
    pub(crate) fn resolve(spec: &UnitSpec, cfg: &StackConfig, graph: &DependencyGraph) -> Self {
        Self {
            unit: Arc::clone(spec.unit()),
            retry: spec.retry_override().unwrap_or(cfg.retry),
            probe_timeout: spec.probe_timeout_override().unwrap_or(cfg.probe_timeout),
            action_timeout: spec.action_timeout_override().unwrap_or(cfg.action_timeout),
            state_paths: spec.state_paths().map(PathBuf::from).collect(),
            dependencies: spec.dependencies().to_vec(),
            group: spec.group().map(str::to_string),
            peers: graph
                .group_peers(spec.name())
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.unit.name()
    }
}

/// Result of driving one unit.
pub(crate) struct Outcome {
    pub(crate) report: UnitReport,
    pub(crate) deadline_hit: bool,
}

/// Why an attempt loop stopped early.
enum Interrupt {
    Deadline,
    BackoffPastDeadline(Duration),
    Cancelled,
}

impl Interrupt {
    fn reason(&self, last: Option<&str>) -> String {
        let what = match self {
            Interrupt::Deadline => "deadline exceeded".to_string(),
            Interrupt::BackoffPastDeadline(delay) => {
                format!("backoff of {delay:?} would exceed deadline")
            }
            Interrupt::Cancelled => "cancelled".to_string(),
        };
        match last {
            Some(last) => format!("{what} (last failure: {last})"),
            None => what,
        }
    }
}

/// Supervises bring-up of a single unit.
pub(crate) struct RecoveryActor {
    unit: Arc<Managed>,
    bus: Bus,
    table: Arc<UnitTable>,
    started: Instant,
}

impl RecoveryActor {
    pub(crate) fn new(unit: Arc<Managed>, bus: Bus, table: Arc<UnitTable>) -> Self {
        Self {
            unit,
            bus,
            table,
            started: Instant::now(),
        }
    }

    /// Runs the unit to `Healthy` or `Failed`.
    pub(crate) async fn run(mut self, deadline: Instant, token: CancellationToken) -> Outcome {
        self.started = Instant::now();
        let name = self.unit.name().to_string();
        let retry = self.unit.retry;
        let mut last_failure: Option<String> = None;

        if self.table.get(&name).await == UnitState::Healthy {
            self.publish(Event::new(EventKind::UnitReprobed));
            let budget = clip(self.unit.probe_timeout, deadline);
            match run_probe(self.unit.unit.as_ref(), budget, &token).await {
                Ok(()) => {
                    self.publish(
                        Event::new(EventKind::UnitHealthy)
                            .with_attempt(0)
                            .with_state(UnitState::Healthy),
                    );
                    return self.settle(UnitState::Healthy, 0, None, false);
                }
                Err(e) => {
                    let e = AttemptError::from(e);
                    self.publish_failure(0, &e);
                    last_failure = Some(e.to_string());
                }
            }
        }

        let mut attempt: u32 = 0;
        let mut start_done = false;
        while attempt < retry.max_attempts {
            if let Some(interrupt) = interrupted(deadline, &token) {
                return self.fail(attempt, interrupt, last_failure).await;
            }
            attempt += 1;

            if attempt > 1 && retry.resets_before(attempt) {
                self.reset(attempt, deadline, &token).await;
                start_done = false;
            }

            if let Err(holder) = self.table.begin(&name, &self.unit.peers).await {
                return self.exclude(attempt - 1, holder).await;
            }
            self.publish(
                Event::new(EventKind::UnitStarting)
                    .with_attempt(attempt)
                    .with_state(UnitState::Starting),
            );

            match self.attempt_once(deadline, &token, &mut start_done).await {
                Ok(()) => {
                    self.table.set(&name, UnitState::Healthy).await;
                    self.publish(
                        Event::new(EventKind::UnitHealthy)
                            .with_attempt(attempt)
                            .with_state(UnitState::Healthy),
                    );
                    return self.settle(UnitState::Healthy, attempt, last_failure, false);
                }
                Err(e) => {
                    self.publish_failure(attempt, &e);
                    last_failure = Some(e.to_string());
                }
            }

            if attempt >= retry.max_attempts {
                break;
            }
            if let Some(interrupt) = interrupted(deadline, &token) {
                return self.fail(attempt, interrupt, last_failure).await;
            }

            let delay = retry.delay(attempt);
            let reason = last_failure.clone().unwrap_or_default();
            self.table.set(&name, UnitState::Degraded).await;
            self.publish(
                Event::new(EventKind::UnitDegraded)
                    .with_attempt(attempt)
                    .with_reason(reason.clone())
                    .with_state(UnitState::Degraded),
            );
            if Instant::now() + delay >= deadline {
                let interrupt = Interrupt::BackoffPastDeadline(delay);
                return self.fail(attempt, interrupt, last_failure).await;
            }
            self.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_reason(reason),
            );

            select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => {
                    return self.fail(attempt, Interrupt::Cancelled, last_failure).await;
                }
            }
        }

        let reason = last_failure.unwrap_or_else(|| "no attempts allowed".to_string());
        self.table.set(&name, UnitState::Failed).await;
        self.publish(
            Event::new(EventKind::UnitFailed)
                .with_attempt(attempt)
                .with_reason(reason.clone())
                .with_state(UnitState::Failed),
        );
        self.settle(UnitState::Failed, attempt, Some(reason), false)
    }

    /// One attempt: start (unless a oneshot already completed it), then probe.
    async fn attempt_once(
        &self,
        deadline: Instant,
        token: &CancellationToken,
        start_done: &mut bool,
    ) -> Result<(), AttemptError> {
        let unit = self.unit.unit.as_ref();
        if !*start_done {
            run_action(
                unit,
                Action::Start,
                clip(self.unit.action_timeout, deadline),
                token,
            )
            .await?;
            *start_done = unit.kind() == UnitKind::Oneshot;
        }
        run_probe(unit, clip(self.unit.probe_timeout, deadline), token).await?;
        Ok(())
    }

    async fn reset(&self, attempt: u32, deadline: Instant, token: &CancellationToken) {
        let res = reset_state(
            self.unit.unit.as_ref(),
            &self.unit.state_paths,
            clip(self.unit.action_timeout, deadline),
            token,
        )
        .await;
        match res {
            Ok(()) => self.publish(Event::new(EventKind::ResetPerformed).with_attempt(attempt)),
            Err(e) => self.publish(
                Event::new(EventKind::ResetFailed)
                    .with_attempt(attempt)
                    .with_reason(e.to_string()),
            ),
        }
    }

    async fn fail(&self, attempts: u32, interrupt: Interrupt, last: Option<String>) -> Outcome {
        let reason = interrupt.reason(last.as_deref());
        self.table.set(self.unit.name(), UnitState::Failed).await;
        self.publish(
            Event::new(EventKind::UnitFailed)
                .with_attempt(attempts)
                .with_reason(reason.clone())
                .with_state(UnitState::Failed),
        );
        let deadline_hit = !matches!(interrupt, Interrupt::Cancelled);
        self.settle(UnitState::Failed, attempts, Some(reason), deadline_hit)
    }

    /// Leaves the unit `Stopped` because `holder` runs its exclusion group.
    async fn exclude(&self, attempts: u32, holder: String) -> Outcome {
        let group = self.unit.group.as_deref().unwrap_or_default();
        let reason = format!("exclusion group '{group}' is held by '{holder}'");
        self.table.set(self.unit.name(), UnitState::Stopped).await;
        self.publish(
            Event::new(EventKind::UnitSkipped)
                .with_reason(reason.clone())
                .with_state(UnitState::Stopped),
        );
        let mut out = self.settle(UnitState::Stopped, attempts, Some(reason), false);
        out.report.excluded_by = Some(holder);
        out
    }

    fn settle(
        &self,
        state: UnitState,
        attempts: u32,
        last_failure: Option<String>,
        deadline_hit: bool,
    ) -> Outcome {
        Outcome {
            report: UnitReport {
                name: self.unit.name().to_string(),
                state,
                attempts,
                elapsed: self.started.elapsed(),
                last_failure,
                excluded_by: None,
            },
            deadline_hit,
        }
    }

    fn publish_failure(&self, attempt: u32, err: &AttemptError) {
        let ev = match err {
            AttemptError::Probe(ProbeFailure::TimedOut { timeout }) => {
                Event::new(EventKind::ProbeTimedOut).with_timeout(*timeout)
            }
            AttemptError::Probe(_) => Event::new(EventKind::ProbeUnhealthy),
            AttemptError::Action(_) => Event::new(EventKind::ActionFailed),
        };
        tracing::debug!(unit = self.unit.name(), attempt, label = err.as_label(), "attempt failed");
        self.publish(ev.with_attempt(attempt).with_reason(err.to_string()));
    }

    fn publish(&self, ev: Event) {
        self.bus.publish(ev.with_unit(self.unit.name()));
    }
}

/// Marks a unit that is not going to be started as `Failed`.
pub(crate) async fn skip(table: &UnitTable, bus: &Bus, name: &str, reason: String) -> UnitReport {
    table.set(name, UnitState::Failed).await;
    bus.publish(
        Event::new(EventKind::UnitSkipped)
            .with_unit(name)
            .with_reason(reason.clone())
            .with_state(UnitState::Failed),
    );
    UnitReport {
        name: name.to_string(),
        state: UnitState::Failed,
        attempts: 0,
        elapsed: Duration::ZERO,
        last_failure: Some(reason),
        excluded_by: None,
    }
}

/// Marks a unit whose recovery task died as `Failed`.
pub(crate) async fn abandon(
    table: &UnitTable,
    bus: &Bus,
    name: &str,
    reason: String,
) -> UnitReport {
    table.set(name, UnitState::Failed).await;
    bus.publish(
        Event::new(EventKind::UnitFailed)
            .with_unit(name)
            .with_reason(reason.clone())
            .with_state(UnitState::Failed),
    );
    UnitReport {
        name: name.to_string(),
        state: UnitState::Failed,
        attempts: 0,
        elapsed: Duration::ZERO,
        last_failure: Some(reason),
        excluded_by: None,
    }
}

/// Fails every unit left `Starting` or `Degraded`; returns their names.
pub(crate) async fn sweep_in_flight(table: &UnitTable, bus: &Bus) -> Vec<String> {
    let swept = table.fail_in_flight().await;
    for name in &swept {
        bus.publish(
            Event::new(EventKind::UnitFailed)
                .with_unit(name.as_str())
                .with_reason("deadline exceeded")
                .with_state(UnitState::Failed),
        );
    }
    swept
}

/// Stops one unit; on success it becomes `Stopped`.
///
/// The recorded state is left unchanged when the stop fails.
pub(crate) async fn stop(
    unit: &Managed,
    table: &UnitTable,
    bus: &Bus,
    deadline: Instant,
    token: &CancellationToken,
) -> Result<(), StopError> {
    let name = unit.name();
    let res = if Instant::now() >= deadline {
        Err(ActionError::DeadlineExceeded { action: Action::Stop })
    } else {
        run_action(
            unit.unit.as_ref(),
            Action::Stop,
            clip(unit.action_timeout, deadline),
            token,
        )
        .await
    };

    match res {
        Ok(()) => {
            table.set(name, UnitState::Stopped).await;
            bus.publish(
                Event::new(EventKind::UnitStopped)
                    .with_unit(name)
                    .with_state(UnitState::Stopped),
            );
            Ok(())
        }
        Err(error) => {
            bus.publish(
                Event::new(EventKind::StopFailed)
                    .with_unit(name)
                    .with_reason(error.to_string()),
            );
            Err(StopError {
                unit: name.to_string(),
                error,
            })
        }
    }
}

/// Clears a unit's runtime state on request; a `Failed` unit becomes `Stopped`.
pub(crate) async fn reset(
    unit: &Managed,
    table: &UnitTable,
    bus: &Bus,
    token: &CancellationToken,
) -> Result<(), ResetError> {
    let name = unit.name();
    let res = reset_state(
        unit.unit.as_ref(),
        &unit.state_paths,
        unit.action_timeout,
        token,
    )
    .await;

    match &res {
        Ok(()) => {
            if table.get(name).await == UnitState::Failed {
                table.set(name, UnitState::Stopped).await;
            }
            bus.publish(Event::new(EventKind::ResetPerformed).with_unit(name));
        }
        Err(e) => bus.publish(
            Event::new(EventKind::ResetFailed)
                .with_unit(name)
                .with_reason(e.to_string()),
        ),
    }
    res
}

/// `budget` clipped to the time left before `deadline`.
fn clip(budget: Duration, deadline: Instant) -> Duration {
    budget.min(deadline.saturating_duration_since(Instant::now()))
}

fn interrupted(deadline: Instant, token: &CancellationToken) -> Option<Interrupt> {
    if token.is_cancelled() {
        Some(Interrupt::Cancelled)
    } else if Instant::now() >= deadline {
        Some(Interrupt::Deadline)
    } else {
        None
    }
}
