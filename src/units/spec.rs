//! # Unit specification for supervised bring-up.
//!
//! [`UnitSpec`] bundles a [`Unit`](crate::Unit) with everything the runtime needs
//! to place and supervise it: dependencies, mutual-exclusion group, the runtime
//! state paths it owns, and optional per-unit overrides of the stack's retry policy
//! and timeouts (unset overrides fall back to [`StackConfig`](crate::StackConfig)).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policies::RetryPolicy;
use crate::units::unit::UnitRef;

/// Specification of one managed unit within a stack.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use stackvisor::{RetryPolicy, UnitFn, UnitSpec};
///
/// let spec = UnitSpec::new(UnitFn::new("wireplumber").arc())
///     .depends_on(["pipewire"])
///     .probe_timeout(Duration::from_secs(3))
///     .retry(RetryPolicy { max_attempts: 5, ..RetryPolicy::default() });
///
/// assert_eq!(spec.name(), "wireplumber");
/// assert_eq!(spec.dependencies(), ["pipewire".to_string()]);
/// ```
#[derive(Clone)]
pub struct UnitSpec {
    unit: UnitRef,
    depends_on: Vec<String>,
    exclusion_group: Option<String>,
    state_paths: Vec<PathBuf>,
    retry: Option<RetryPolicy>,
    probe_timeout: Option<Duration>,
    action_timeout: Option<Duration>,
}

impl UnitSpec {
    /// Creates a spec with no dependencies and stack-default policies.
    pub fn new(unit: UnitRef) -> Self {
        Self {
            unit,
            depends_on: Vec::new(),
            exclusion_group: None,
            state_paths: Vec::new(),
            retry: None,
            probe_timeout: None,
            action_timeout: None,
        }
    }

    /// Adds units that must be healthy before this one starts.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.depends_on.contains(&name) {
                self.depends_on.push(name);
            }
        }
        self
    }

    /// Puts the unit into a mutual-exclusion group.
    pub fn exclusion_group(mut self, group: impl Into<String>) -> Self {
        self.exclusion_group = Some(group.into());
        self
    }

    /// Declares a runtime state path (socket, cache directory, ...) owned by this unit.
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_paths.push(path.into());
        self
    }

    /// Overrides the stack's retry policy for this unit.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Overrides the stack's probe timeout for this unit.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Overrides the stack's action timeout (start/stop/reset) for this unit.
    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = Some(timeout);
        self
    }

    /// Returns the unit handle.
    pub fn unit(&self) -> &UnitRef {
        &self.unit
    }

    /// Convenience: returns the unit name.
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// Declared dependencies, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    /// Mutual-exclusion group, if any.
    pub fn group(&self) -> Option<&str> {
        self.exclusion_group.as_deref()
    }

    /// Runtime state paths owned by this unit.
    pub fn state_paths(&self) -> impl Iterator<Item = &Path> {
        self.state_paths.iter().map(PathBuf::as_path)
    }

    /// Per-unit retry override.
    pub fn retry_override(&self) -> Option<RetryPolicy> {
        self.retry
    }

    /// Per-unit probe timeout override.
    pub fn probe_timeout_override(&self) -> Option<Duration> {
        self.probe_timeout
    }

    /// Per-unit action timeout override.
    pub fn action_timeout_override(&self) -> Option<Duration> {
        self.action_timeout
    }
}

impl std::fmt::Debug for UnitSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitSpec")
            .field("name", &self.name())
            .field("kind", &self.unit.kind())
            .field("depends_on", &self.depends_on)
            .field("exclusion_group", &self.exclusion_group)
            .field("state_paths", &self.state_paths)
            .finish_non_exhaustive()
    }
}
