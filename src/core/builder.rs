use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{StackConfig, StackFile};
use crate::core::controller::StackController;
use crate::core::recovery::Managed;
use crate::error::{ConfigError, LoadError};
use crate::events::Bus;
use crate::plan::DependencyGraph;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::units::UnitSpec;

/// Builder for a [`StackController`].
///
/// ```rust
/// use stackvisor::{StackBuilder, StackConfig, UnitFn, UnitSpec};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), stackvisor::ConfigError> {
/// let stack = StackBuilder::new(StackConfig::default())
///     .unit(UnitSpec::new(UnitFn::new("pipewire").arc()))
///     .unit(UnitSpec::new(UnitFn::new("wireplumber").arc()).depends_on(["pipewire"]))
///     .build()?;
///
/// assert_eq!(stack.plan().batches().len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct StackBuilder {
    cfg: StackConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    specs: Vec<UnitSpec>,
}

impl StackBuilder {
    /// Creates a builder with the given configuration and no units.
    pub fn new(cfg: StackConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            specs: Vec::new(),
        }
    }

    /// Creates a builder from a parsed stack file.
    pub fn from_file(file: &StackFile) -> Result<Self, LoadError> {
        Ok(Self::new(file.stack.clone()).units(file.specs()?))
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets its own worker and bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one unit. Declaration order breaks ties in the plan.
    pub fn unit(mut self, spec: UnitSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Adds several units, in order.
    pub fn units(mut self, specs: impl IntoIterator<Item = UnitSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Validates the stack and returns its controller.
    ///
    /// Nothing is started: on error no unit has been touched. Must be called from
    /// within a tokio runtime (subscriber workers are spawned here).
    pub fn build(self) -> Result<Arc<StackController>, ConfigError> {
        self.cfg
            .retry
            .validate()
            .map_err(|reason| ConfigError::InvalidPolicy {
                unit: "[stack]".to_string(),
                reason,
            })?;
        for spec in &self.specs {
            if let Some(retry) = spec.retry_override() {
                retry.validate().map_err(|reason| ConfigError::InvalidPolicy {
                    unit: spec.name().to_string(),
                    reason,
                })?;
            }
        }

        let graph = DependencyGraph::build(&self.specs)?;
        let plan = graph.plan()?;
        let units: HashMap<String, Arc<Managed>> = self
            .specs
            .iter()
            .map(|spec| {
                let managed = Managed::resolve(spec, &self.cfg, &graph);
                (spec.name().to_string(), Arc::new(managed))
            })
            .collect();

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());

        Ok(Arc::new(StackController::new_internal(
            self.cfg, graph, plan, units, bus, subs,
        )))
    }
}
