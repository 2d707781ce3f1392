//! # Batch-by-batch bring-up.
//!
//! Walks a [`StackPlan`] in order. Units of one batch are driven concurrently, one
//! [`RecoveryActor`] task each; the next batch starts only once every unit of the
//! current one is `Healthy` or `Failed` (or `Stopped`, when its exclusion group was
//! held by another member).
//!
//! ```text
//! for batch in plan:
//!   publish BatchStarted
//!   for unit in batch:
//!     deadline passed?            ─► skip (Failed)
//!     a dependency not Healthy?   ─► skip (Failed)
//!     otherwise                   ─► JoinSet::spawn(RecoveryActor::run)
//!   join all ─► collect UnitReport (task panicked ─► Failed)
//! sweep: nothing is left Starting / Degraded
//! ```
//!
//! A failed unit only fails its own dependents; independent branches keep going.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::recovery::{self, Managed, Outcome, RecoveryActor};
use crate::core::table::UnitTable;
use crate::events::{Bus, Event, EventKind};
use crate::plan::StackPlan;
use crate::report::UnitReport;
use crate::state::UnitState;

pub(crate) struct Sequencer<'a> {
    pub(crate) plan: &'a StackPlan,
    pub(crate) units: &'a HashMap<String, Arc<Managed>>,
    pub(crate) table: &'a Arc<UnitTable>,
    pub(crate) bus: &'a Bus,
}

/// Reports in plan order, plus whether the deadline cut the run short.
pub(crate) struct SequencerRun {
    pub(crate) reports: Vec<UnitReport>,
    pub(crate) deadline_hit: bool,
}

impl Sequencer<'_> {
    pub(crate) async fn run(&self, deadline: Instant, token: &CancellationToken) -> SequencerRun {
        let mut done: HashMap<String, UnitReport> = HashMap::with_capacity(self.units.len());
        let mut deadline_hit = false;

        for (index, batch) in self.plan.batches().iter().enumerate() {
            self.bus.publish(
                Event::new(EventKind::BatchStarted)
                    .with_batch(index)
                    .with_count(batch.len()),
            );

            let mut set: JoinSet<Result<Outcome, String>> = JoinSet::new();
            for name in batch {
                let Some(unit) = self.units.get(name) else {
                    continue;
                };
                if let Some(reason) = self.blocked(unit, deadline).await {
                    deadline_hit |= Instant::now() >= deadline;
                    let report = recovery::skip(self.table, self.bus, name, reason).await;
                    done.insert(name.clone(), report);
                    continue;
                }

                let actor =
                    RecoveryActor::new(Arc::clone(unit), self.bus.clone(), Arc::clone(self.table));
                let fut = AssertUnwindSafe(actor.run(deadline, token.child_token()));
                set.spawn(async move { fut.catch_unwind().await.map_err(panic_message) });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => {
                        deadline_hit |= outcome.deadline_hit;
                        done.insert(outcome.report.name.clone(), outcome.report);
                    }
                    Ok(Err(panic)) => {
                        tracing::error!(batch = index, %panic, "recovery task panicked")
                    }
                    Err(err) => tracing::error!(batch = index, error = %err, "recovery task died"),
                }
            }

            for name in batch {
                if !done.contains_key(name) {
                    let reason = "recovery task died".to_string();
                    let report = recovery::abandon(self.table, self.bus, name, reason).await;
                    done.insert(name.clone(), report);
                }
            }
        }

        let swept = recovery::sweep_in_flight(self.table, self.bus).await;
        for name in swept {
            if let Some(report) = done.get_mut(&name) {
                report.state = UnitState::Failed;
            }
        }

        let reports = self
            .plan
            .units()
            .filter_map(|name| done.remove(name))
            .collect();
        SequencerRun {
            reports,
            deadline_hit,
        }
    }

    /// Returns why `unit` must not be started, if it must not.
    async fn blocked(&self, unit: &Managed, deadline: Instant) -> Option<String> {
        if Instant::now() >= deadline {
            return Some("deadline exceeded before start".to_string());
        }
        for dep in &unit.dependencies {
            let state = self.table.get(dep).await;
            if state != UnitState::Healthy {
                return Some(format!("dependency '{dep}' is {state}"));
            }
        }
        None
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::error::ProbeFailure;
    use crate::plan::DependencyGraph;
    use crate::policies::{ResetMode, RetryPolicy};
    use crate::units::{UnitFn, UnitSpec};
    use std::time::Duration;

    fn prepare(specs: &[UnitSpec]) -> (StackPlan, HashMap<String, Arc<Managed>>, Arc<UnitTable>) {
        let graph = DependencyGraph::build(specs).unwrap();
        let plan = graph.plan().unwrap();
        let cfg = StackConfig {
            retry: RetryPolicy::once(),
            ..StackConfig::default()
        };
        let units = specs
            .iter()
            .map(|s| (s.name().to_string(), Arc::new(Managed::resolve(s, &cfg, &graph))))
            .collect();
        let table = Arc::new(UnitTable::new(plan.units()));
        (plan, units, table)
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_of_one_unit_does_not_hold_back_its_batch_peers() {
        let broken = UnitFn::new("bluetooth").on_probe(|_ctx: CancellationToken| async {
            Err(ProbeFailure::Unhealthy {
                reason: "adapter not powered".into(),
            })
        });
        let slow = UnitFn::new("pipewire").on_probe(|_ctx: CancellationToken| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, ProbeFailure>(())
        });
        let long_backoff = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(10),
            multiplier: 1.0,
            max_delay: Duration::from_secs(10),
            reset: ResetMode::Never,
        };
        let specs = vec![
            UnitSpec::new(broken.arc()).retry(long_backoff),
            UnitSpec::new(slow.arc()),
        ];
        let (plan, units, table) = prepare(&specs);
        assert_eq!(plan.batches().len(), 1);
        let bus = Bus::new(256);

        let sequencer = Sequencer {
            plan: &plan,
            units: &units,
            table: &table,
            bus: &bus,
        };
        let token = CancellationToken::new();
        let observe = async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            table.snapshot().await
        };
        let (run, mid) = tokio::join!(
            sequencer.run(Instant::now() + Duration::from_secs(60), &token),
            observe,
        );

        assert_eq!(mid["pipewire"], UnitState::Healthy);
        assert_eq!(mid["bluetooth"], UnitState::Degraded);

        let bt = run.reports.iter().find(|r| r.name == "bluetooth").unwrap();
        assert_eq!((bt.state, bt.attempts), (UnitState::Failed, 2));
        assert!(bt.elapsed >= Duration::from_secs(10));
        let pw = run.reports.iter().find(|r| r.name == "pipewire").unwrap();
        assert_eq!(pw.state, UnitState::Healthy);
        assert!(pw.elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_skips_dependents_but_not_independent_branches() {
        let broken = UnitFn::new("pipewire").on_probe(|_ctx: CancellationToken| async {
            Err(ProbeFailure::Unhealthy {
                reason: "no core".into(),
            })
        });
        let specs = vec![
            UnitSpec::new(broken.arc()),
            UnitSpec::new(UnitFn::new("wireplumber").arc()).depends_on(["pipewire"]),
            UnitSpec::new(UnitFn::new("bluetooth").arc()),
            UnitSpec::new(UnitFn::new("bt-agent").arc()).depends_on(["bluetooth"]),
        ];
        let (plan, units, table) = prepare(&specs);
        let bus = Bus::new(256);

        let run = Sequencer {
            plan: &plan,
            units: &units,
            table: &table,
            bus: &bus,
        }
        .run(
            Instant::now() + Duration::from_secs(60),
            &CancellationToken::new(),
        )
        .await;

        let states: Vec<(&str, UnitState, u32)> = run
            .reports
            .iter()
            .map(|r| (r.name.as_str(), r.state, r.attempts))
            .collect();
        assert_eq!(
            states,
            vec![
                ("pipewire", UnitState::Failed, 1),
                ("bluetooth", UnitState::Healthy, 1),
                ("wireplumber", UnitState::Failed, 0),
                ("bt-agent", UnitState::Healthy, 1),
            ]
        );
        assert_eq!(
            run.reports[2].last_failure.as_deref(),
            Some("dependency 'pipewire' is failed")
        );
        assert!(!run.deadline_hit);
    }
}
