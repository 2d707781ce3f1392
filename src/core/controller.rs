//! # StackController: the public entry point of a stack.
//!
//! The [`StackController`] owns the validated plan, the shared unit state table,
//! the event bus and the subscriber fan-out. It exposes the three stack operations:
//!
//! - [`bring_up`](StackController::bring_up): sequencer + recovery loops, then the
//!   stack-wide [`FailurePolicy`]; always returns a complete [`BringUpReport`]
//! - [`tear_down`](StackController::tear_down): stop every unit in exact reverse plan
//!   order, best-effort
//! - [`status`](StackController::status): read-only snapshot, safe during a bring-up
//!
//! ## Architecture
//! ```text
//! StackBuilder::build()
//!   ├─► DependencyGraph::build + plan()        (ConfigError here, nothing touched)
//!   ├─► Bus::new(cfg.bus_capacity)
//!   ├─► SubscriberSet::new(subscribers)
//!   └─► listener: Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!
//! bring_up_within(deadline):
//!   op lock ─► BringUpStarted
//!          ─► Sequencer::run(plan)            batch by batch, one RecoveryActor per unit
//!          ─► [deadline hit] DeadlineExceeded
//!          ─► [a unit failed] FailurePolicy
//!                 Isolate:  stop running dependents of failed units ─► UnitRolledBack
//!                 TearDown: tear_down()
//!          ─► BringUpFinished, keep as last report
//!
//! tear_down_within(deadline):
//!   op lock ─► for unit in plan.teardown_order(): stop ─► UnitStopped / StopFailed
//!          ─► TearDownFinished
//! ```
//!
//! ## Rules
//! - `bring_up`, `tear_down` and `reset` are serialized; `status` never waits for them.
//! - Every run is bounded by a deadline; nothing is left `Starting` or `Degraded`.
//! - Failed units are never rolled back silently: every unit stopped by the failure
//!   policy is listed in [`BringUpReport::rolled_back`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::StackConfig;
use crate::core::recovery::{self, Managed};
use crate::core::sequencer::Sequencer;
use crate::core::shutdown;
use crate::core::table::UnitTable;
use crate::error::ResetError;
use crate::events::{Bus, Event, EventKind};
use crate::plan::{DependencyGraph, StackPlan};
use crate::policies::FailurePolicy;
use crate::report::{BringUpReport, TearDownReport};
use crate::state::UnitState;
use crate::subscribers::SubscriberSet;

/// Orchestrates bring-up, tear-down and health reporting of one stack.
pub struct StackController {
    cfg: StackConfig,
    graph: DependencyGraph,
    plan: StackPlan,
    units: HashMap<String, Arc<Managed>>,
    table: Arc<UnitTable>,
    bus: Bus,
    op: Mutex<()>,
    last: RwLock<Option<BringUpReport>>,
    token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl StackController {
    /// Starts a [`StackBuilder`](crate::StackBuilder) with the given configuration.
    pub fn builder(cfg: StackConfig) -> crate::StackBuilder {
        crate::StackBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: StackConfig,
        graph: DependencyGraph,
        plan: StackPlan,
        units: HashMap<String, Arc<Managed>>,
        bus: Bus,
        subs: SubscriberSet,
    ) -> Self {
        let table = Arc::new(UnitTable::new(plan.units()));
        let token = CancellationToken::new();
        let listener = spawn_listener(&bus, subs, token.clone());

        Self {
            cfg,
            graph,
            plan,
            units,
            table,
            bus,
            op: Mutex::new(()),
            last: RwLock::new(None),
            token,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Brings the stack up within the configured `bring_up_deadline`.
    pub async fn bring_up(&self) -> BringUpReport {
        self.bring_up_within(self.cfg.bring_up_deadline).await
    }

    /// Brings the stack up, giving up on unfinished units after `within`.
    ///
    /// Units already `Healthy` are re-probed rather than restarted. Expected failures
    /// never surface as errors; they are in the returned report.
    pub async fn bring_up_within(&self, within: Duration) -> BringUpReport {
        let _op = self.op.lock().await;
        let started = Instant::now();
        let deadline = deadline_after(within);
        let before = self.table.snapshot().await;
        let token = self.token.child_token();

        self.bus
            .publish(Event::new(EventKind::BringUpStarted).with_count(self.plan.len()));

        let run = Sequencer {
            plan: &self.plan,
            units: &self.units,
            table: &self.table,
            bus: &self.bus,
        }
        .run(deadline, &token)
        .await;

        if run.deadline_hit {
            self.bus
                .publish(Event::new(EventKind::DeadlineExceeded).with_timeout(within));
        }

        let mut report = BringUpReport {
            units: run.reports,
            elapsed: started.elapsed(),
            deadline_hit: run.deadline_hit,
            rolled_back: Vec::new(),
        };
        if report.failed().next().is_some() {
            report.rolled_back = self.apply_failure_policy(&report, &before).await;
        }

        self.bus.publish(
            Event::new(EventKind::BringUpFinished)
                .with_count(report.healthy_count())
                .with_reason(report.summary()),
        );
        *self.last.write().await = Some(report.clone());
        report
    }

    /// Stops every unit within the configured `tear_down_deadline`.
    pub async fn tear_down(&self) -> TearDownReport {
        self.tear_down_within(self.cfg.tear_down_deadline).await
    }

    /// Stops every unit in exact reverse plan order, giving up after `within`.
    ///
    /// Every unit is visited, whatever its recorded state; stop failures are collected
    /// and do not interrupt the walk. Units reached after the deadline are reported as
    /// failed with [`ActionError::DeadlineExceeded`](crate::ActionError::DeadlineExceeded).
    pub async fn tear_down_within(&self, within: Duration) -> TearDownReport {
        let _op = self.op.lock().await;
        self.tear_down_locked(deadline_after(within)).await
    }

    /// Current state of every unit. Never waits for a running bring-up.
    pub async fn status(&self) -> BTreeMap<String, UnitState> {
        self.table.snapshot().await
    }

    /// Current state of one unit.
    pub async fn unit_state(&self, name: &str) -> Option<UnitState> {
        if self.units.contains_key(name) {
            Some(self.table.get(name).await)
        } else {
            None
        }
    }

    /// Clears `name`'s declared runtime state and runs its reset hook.
    ///
    /// Idempotent. A `Failed` unit becomes `Stopped` on success; other states are kept.
    pub async fn reset(&self, name: &str) -> Result<(), ResetError> {
        let unit = self.units.get(name).ok_or_else(|| ResetError::UnknownUnit {
            unit: name.to_string(),
        })?;
        let _op = self.op.lock().await;
        recovery::reset(unit, &self.table, &self.bus, &CancellationToken::new()).await
    }

    /// The report of the most recent bring-up, if any.
    pub async fn last_report(&self) -> Option<BringUpReport> {
        self.last.read().await.clone()
    }

    /// The bring-up plan.
    pub fn plan(&self) -> &StackPlan {
        &self.plan
    }

    /// The runtime configuration.
    pub fn config(&self) -> &StackConfig {
        &self.cfg
    }

    /// Receiver for runtime events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Keeps the stack as it is until a termination signal arrives, then tears it down.
    pub async fn hold_until_signal(&self) -> std::io::Result<TearDownReport> {
        let signal = shutdown::wait_for_shutdown_signal().await?;
        tracing::info!(signal, "termination signal received");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(signal));
        Ok(self.tear_down().await)
    }

    /// Cancels any running bring-up and drains subscribers.
    ///
    /// Units are left as they are; call [`tear_down`](Self::tear_down) first to stop
    /// them. Events published afterwards are no longer delivered to subscribers.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = self.listener.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "subscriber listener ended abnormally");
            }
        }
    }

    async fn tear_down_locked(&self, deadline: Instant) -> TearDownReport {
        let started = Instant::now();
        // Fresh token: a cancelled bring-up must not prevent stopping units.
        let token = CancellationToken::new();
        let mut report = TearDownReport::default();

        for name in self.plan.teardown_order() {
            report.visited.push(name.to_string());
            let Some(unit) = self.units.get(name) else {
                continue;
            };
            if let Err(e) = recovery::stop(unit, &self.table, &self.bus, deadline, &token).await {
                report.failures.push(e);
            }
        }

        report.elapsed = started.elapsed();
        self.bus.publish(
            Event::new(EventKind::TearDownFinished).with_count(report.failures.len()),
        );
        report
    }

    /// Applies the stack-wide failure policy; returns the units it stopped.
    async fn apply_failure_policy(
        &self,
        report: &BringUpReport,
        before: &BTreeMap<String, UnitState>,
    ) -> Vec<String> {
        let was_running = |name: &str| before.get(name).is_some_and(is_running);

        match self.cfg.failure_policy {
            FailurePolicy::TearDown => {
                let running = self.table.snapshot().await;
                let td = self
                    .tear_down_locked(deadline_after(self.cfg.tear_down_deadline))
                    .await;
                let failed: HashSet<&str> = td.failures.iter().map(|f| f.unit.as_str()).collect();
                td.visited
                    .iter()
                    .filter(|name| !failed.contains(name.as_str()))
                    .filter(|name| {
                        was_running(name)
                            || running.get(name.as_str()).is_some_and(is_running)
                    })
                    .cloned()
                    .collect()
            }
            FailurePolicy::Isolate => {
                let mut doomed: HashMap<String, String> = HashMap::new();
                for failed in report.failed() {
                    for dependent in self.graph.dependents_of(&failed.name) {
                        doomed.entry(dependent).or_insert_with(|| failed.name.clone());
                    }
                }

                let deadline = deadline_after(self.cfg.tear_down_deadline);
                let token = CancellationToken::new();
                let mut rolled_back = Vec::new();
                for name in self.plan.teardown_order() {
                    let (Some(cause), Some(unit)) = (doomed.get(name), self.units.get(name)) else {
                        continue;
                    };
                    let running = is_running(&self.table.get(name).await);
                    if !(running || was_running(name)) {
                        continue;
                    }
                    if recovery::stop(unit, &self.table, &self.bus, deadline, &token)
                        .await
                        .is_ok()
                    {
                        self.bus.publish(
                            Event::new(EventKind::UnitRolledBack)
                                .with_unit(name)
                                .with_reason(format!("depends on failed unit '{cause}'")),
                        );
                        rolled_back.push(name.to_string());
                    }
                }
                rolled_back
            }
        }
    }
}

/// Forwards bus events to the subscriber set until cancelled, then drains it.
fn spawn_listener(bus: &Bus, set: SubscriberSet, token: CancellationToken) -> JoinHandle<()> {
    use broadcast::error::{RecvError, TryRecvError};

    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                res = rx.recv() => match res {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => set.emit(&ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        set.shutdown().await;
    })
}

fn is_running(state: &UnitState) -> bool {
    matches!(
        state,
        UnitState::Starting | UnitState::Healthy | UnitState::Degraded
    )
}

/// `now + within`, saturating far in the future.
fn deadline_after(within: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(within)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StackBuilder;
    use crate::error::{ActionError, ProbeFailure};
    use crate::policies::{ResetMode, RetryPolicy};
    use crate::units::{Unit, UnitFn, UnitSpec};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time;

    fn cfg(retry: RetryPolicy) -> StackConfig {
        StackConfig {
            retry,
            ..StackConfig::default()
        }
    }

    fn backoff(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            reset: ResetMode::Never,
        }
    }

    /// Unit whose probe fails `failures` times, then succeeds.
    fn flaky(name: &'static str, failures: u32) -> (UnitFn, Arc<AtomicU32>) {
        let probes = Arc::new(AtomicU32::new(0));
        let p = probes.clone();
        let unit = UnitFn::new(name).on_probe(move |_ctx: CancellationToken| {
            let p = p.clone();
            async move {
                if p.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(ProbeFailure::Unhealthy {
                        reason: "not ready".into(),
                    })
                } else {
                    Ok(())
                }
            }
        });
        (unit, probes)
    }

    /// Unit whose probe fails while `down` is set.
    fn switchable(name: &'static str, down: Arc<AtomicBool>) -> UnitFn {
        UnitFn::new(name).on_probe(move |_ctx: CancellationToken| {
            let down = down.clone();
            async move {
                if down.load(Ordering::SeqCst) {
                    Err(ProbeFailure::Unhealthy {
                        reason: "socket gone".into(),
                    })
                } else {
                    Ok(())
                }
            }
        })
    }

    fn counting_stop(unit: UnitFn, log: Arc<StdMutex<Vec<String>>>) -> UnitFn {
        let name = unit.name().to_string();
        unit.on_stop(move |_ctx: CancellationToken| {
            let log = log.clone();
            let name = name.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok::<_, ActionError>(())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn unit_healthy_on_nth_attempt_waits_for_backoff() {
        let (unit, probes) = flaky("pipewire", 2);
        let stack = StackBuilder::new(cfg(backoff(4)))
            .unit(UnitSpec::new(unit.arc()))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        let pw = report.get("pipewire").unwrap();
        assert_eq!(pw.state, UnitState::Healthy);
        assert_eq!(pw.attempts, 3);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        assert!(pw.elapsed >= Duration::from_secs(3), "elapsed {:?}", pw.elapsed);
        assert_eq!(pw.last_failure.as_deref(), Some("unhealthy: not ready"));
        assert!(report.is_healthy());
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unit_that_never_gets_healthy_fails_after_all_attempts() {
        let (unit, probes) = flaky("bluetooth", u32::MAX);
        let stack = StackBuilder::new(cfg(backoff(3)))
            .unit(UnitSpec::new(unit.arc()))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        let bt = report.get("bluetooth").unwrap();
        assert_eq!(bt.state, UnitState::Failed);
        assert_eq!(bt.attempts, 3);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        assert!(bt.elapsed >= Duration::from_secs(3));
        assert!(!report.deadline_hit);
        assert_eq!(stack.unit_state("bluetooth").await, Some(UnitState::Failed));
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tear_down_walks_the_plan_backwards() {
        let stops = Arc::new(StdMutex::new(Vec::new()));
        let unit = |name: &'static str| counting_stop(UnitFn::new(name), stops.clone()).arc();
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(unit("pipewire")))
            .unit(UnitSpec::new(unit("wireplumber")).depends_on(["pipewire"]))
            .unit(UnitSpec::new(unit("pipewire-pulse")).depends_on(["pipewire"]))
            .unit(UnitSpec::new(unit("bluetooth")))
            .unit(UnitSpec::new(unit("bt-agent")).depends_on(["bluetooth", "wireplumber"]))
            .build()
            .unwrap();

        assert!(stack.bring_up().await.is_healthy());
        let down = stack.tear_down().await;

        let expected: Vec<String> = stack.plan().teardown_order().map(String::from).collect();
        assert_eq!(down.visited, expected);
        assert_eq!(*stops.lock().unwrap(), expected);
        assert!(down.is_clean());
        assert!(stack.status().await.values().all(|s| *s == UnitState::Stopped));
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_readable_during_bring_up() {
        let slow = UnitFn::new("pipewire").on_probe(|_ctx: CancellationToken| async {
            time::sleep(Duration::from_secs(2)).await;
            Ok::<_, ProbeFailure>(())
        });
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(slow.arc()))
            .unit(UnitSpec::new(UnitFn::new("wireplumber").arc()).depends_on(["pipewire"]))
            .build()
            .unwrap();

        let running = Arc::clone(&stack);
        let handle = tokio::spawn(async move { running.bring_up().await });
        time::sleep(Duration::from_millis(500)).await;

        let status = stack.status().await;
        assert_eq!(status["pipewire"], UnitState::Starting);
        assert_eq!(status["wireplumber"], UnitState::Stopped);

        let report = handle.await.unwrap();
        assert!(report.is_healthy());
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn short_deadline_fails_unit_and_its_dependents() {
        let (unit, _) = flaky("pipewire", u32::MAX);
        let stack = StackBuilder::new(cfg(backoff(5)))
            .unit(UnitSpec::new(unit.arc()))
            .unit(UnitSpec::new(UnitFn::new("wireplumber").arc()).depends_on(["pipewire"]))
            .build()
            .unwrap();

        let report = stack.bring_up_within(Duration::from_millis(2500)).await;
        assert!(report.deadline_hit);
        let pw = report.get("pipewire").unwrap();
        assert_eq!(pw.state, UnitState::Failed);
        assert_eq!(pw.attempts, 2);
        let reason = pw.last_failure.as_deref().unwrap();
        assert!(reason.starts_with("backoff of 2s would exceed deadline"), "{reason}");
        let wp = report.get("wireplumber").unwrap();
        assert_eq!((wp.state, wp.attempts), (UnitState::Failed, 0));
        assert!(report.elapsed < Duration::from_millis(2500));
        assert!(report.rolled_back.is_empty());
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn isolate_stops_running_dependents_of_a_failed_unit() {
        let down = Arc::new(AtomicBool::new(false));
        let stops = Arc::new(StdMutex::new(Vec::new()));
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(switchable("pipewire", down.clone()).arc()))
            .unit(
                UnitSpec::new(counting_stop(UnitFn::new("wireplumber"), stops.clone()).arc())
                    .depends_on(["pipewire"]),
            )
            .unit(UnitSpec::new(counting_stop(UnitFn::new("bluetooth"), stops.clone()).arc()))
            .build()
            .unwrap();

        assert!(stack.bring_up().await.is_healthy());
        down.store(true, Ordering::SeqCst);

        let report = stack.bring_up().await;
        assert_eq!(report.get("pipewire").unwrap().state, UnitState::Failed);
        assert_eq!(report.rolled_back, ["wireplumber"]);
        assert_eq!(*stops.lock().unwrap(), ["wireplumber"]);

        let status = stack.status().await;
        assert_eq!(status["wireplumber"], UnitState::Stopped);
        assert_eq!(status["bluetooth"], UnitState::Healthy);
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tear_down_policy_stops_the_whole_stack() {
        let (broken, _) = flaky("pipewire", u32::MAX);
        let mut config = cfg(RetryPolicy::once());
        config.failure_policy = FailurePolicy::TearDown;
        let stack = StackBuilder::new(config)
            .unit(UnitSpec::new(broken.arc()))
            .unit(UnitSpec::new(UnitFn::new("wireplumber").arc()).depends_on(["pipewire"]))
            .unit(UnitSpec::new(UnitFn::new("bluetooth").arc()))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        assert_eq!(report.rolled_back, ["bluetooth"]);
        assert_eq!(report.get("bluetooth").unwrap().state, UnitState::Healthy);
        assert!(stack.status().await.values().all(|s| *s == UnitState::Stopped));
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_bring_up_reprobes_instead_of_restarting() {
        let starts = Arc::new(AtomicU32::new(0));
        let s = starts.clone();
        let unit = UnitFn::new("pipewire").on_start(move |_ctx: CancellationToken| {
            let s = s.clone();
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ActionError>(())
            }
        });
        let stack = StackBuilder::new(StackConfig::default())
            .unit(UnitSpec::new(unit.arc()))
            .build()
            .unwrap();

        assert_eq!(stack.bring_up().await.get("pipewire").unwrap().attempts, 1);
        let again = stack.bring_up().await;
        assert!(again.is_healthy());
        assert_eq!(again.get("pipewire").unwrap().attempts, 0);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exclusion_group_admits_one_member() {
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(
                UnitSpec::new(UnitFn::new("pipewire-pulse").arc()).exclusion_group("pulse-server"),
            )
            .unit(UnitSpec::new(UnitFn::new("pulseaudio").arc()).exclusion_group("pulse-server"))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        assert_eq!(report.get("pipewire-pulse").unwrap().state, UnitState::Healthy);
        let pa = report.get("pulseaudio").unwrap();
        assert_eq!((pa.state, pa.attempts), (UnitState::Stopped, 0));
        assert_eq!(pa.excluded_by.as_deref(), Some("pipewire-pulse"));
        assert_eq!(
            pa.last_failure.as_deref(),
            Some("exclusion group 'pulse-server' is held by 'pipewire-pulse'")
        );
        assert!(report.is_healthy());
        assert_eq!(report.failed().count(), 0);
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_alternative_does_not_trigger_tear_down() {
        let stops = Arc::new(StdMutex::new(Vec::new()));
        let unit = |name: &'static str| counting_stop(UnitFn::new(name), stops.clone()).arc();
        let mut config = cfg(RetryPolicy::once());
        config.failure_policy = FailurePolicy::TearDown;
        let stack = StackBuilder::new(config)
            .unit(UnitSpec::new(unit("pipewire")))
            .unit(
                UnitSpec::new(unit("pipewire-pulse"))
                    .depends_on(["pipewire"])
                    .exclusion_group("pulse"),
            )
            .unit(UnitSpec::new(unit("pulseaudio")).exclusion_group("pulse"))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        assert!(report.is_healthy(), "{}", report.summary());
        assert!(report.rolled_back.is_empty());
        assert!(stops.lock().unwrap().is_empty());

        let status = stack.status().await;
        assert_eq!(status["pipewire"], UnitState::Healthy);
        assert_eq!(status["pipewire-pulse"], UnitState::Healthy);
        assert_eq!(status["pulseaudio"], UnitState::Stopped);
        let pa = report.get("pulseaudio").unwrap();
        assert_eq!(pa.excluded_by.as_deref(), Some("pipewire-pulse"));
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn later_group_member_takes_over_when_the_first_fails() {
        let (broken, _) = flaky("pipewire-pulse", u32::MAX);
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(broken.arc()).exclusion_group("pulse"))
            .unit(UnitSpec::new(UnitFn::new("pulseaudio").arc()).exclusion_group("pulse"))
            .build()
            .unwrap();

        let report = stack.bring_up().await;
        assert_eq!(report.get("pipewire-pulse").unwrap().state, UnitState::Failed);
        let pa = report.get("pulseaudio").unwrap();
        assert_eq!((pa.state, pa.attempts), (UnitState::Healthy, 1));
        assert!(!pa.is_excluded());
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_report_and_result() {
        let (broken, _) = flaky("bluetooth", u32::MAX);
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(broken.arc()))
            .build()
            .unwrap();
        assert!(stack.last_report().await.is_none());

        let report = stack.bring_up().await;
        assert_eq!(stack.last_report().await, Some(report.clone()));

        let err = report.into_result().unwrap_err();
        assert_eq!(err.unit, "bluetooth");
        assert_eq!(err.attempts, 1);
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_failed_state() {
        let (broken, _) = flaky("bluetooth", u32::MAX);
        let stack = StackBuilder::new(cfg(RetryPolicy::once()))
            .unit(UnitSpec::new(broken.arc()))
            .build()
            .unwrap();

        let err = stack.reset("pulseaudio").await.unwrap_err();
        assert_eq!(err.as_label(), "reset_unknown_unit");

        stack.bring_up().await;
        assert_eq!(stack.unit_state("bluetooth").await, Some(UnitState::Failed));
        stack.reset("bluetooth").await.unwrap();
        assert_eq!(stack.unit_state("bluetooth").await, Some(UnitState::Stopped));
        assert_eq!(stack.unit_state("pulseaudio").await, None);
        stack.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bring_up_publishes_lifecycle_events() {
        let stack = StackBuilder::new(StackConfig::default())
            .unit(UnitSpec::new(UnitFn::new("pipewire").arc()))
            .build()
            .unwrap();
        let mut rx = stack.subscribe();

        stack.bring_up().await;
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(
            kinds,
            [
                EventKind::BringUpStarted,
                EventKind::BatchStarted,
                EventKind::UnitStarting,
                EventKind::UnitHealthy,
                EventKind::BringUpFinished,
            ]
        );
        stack.shutdown().await;
    }
}
