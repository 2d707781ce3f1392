//! # Runtime configuration and stack files.
//!
//! [`StackConfig`] centralizes the runtime knobs of a stack: the default retry
//! policy, probe and action timeouts, the deadlines of bring-up and tear-down, the
//! stack-wide failure policy, and the event bus capacity. Per-unit overrides live
//! on [`UnitSpec`].
//!
//! [`StackFile`] is the TOML form of a whole stack: runtime knobs, a shared
//! environment, and one `[[unit]]` table per managed unit whose actions are argv
//! commands (see [`CommandUnit`]).
//!
//! ```toml
//! [stack]
//! probe_timeout_ms = 5000
//! bring_up_deadline_ms = 120000
//! failure_policy = "isolate"
//!
//! [stack.retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! multiplier = 2.0
//! max_delay_ms = 10000
//! reset = "after_first_retry"
//!
//! [env]
//! XDG_RUNTIME_DIR = "/run/user/1000"
//!
//! [[unit]]
//! name = "pipewire"
//! start = ["systemctl", "--user", "start", "pipewire.service"]
//! stop = ["systemctl", "--user", "stop", "pipewire.service"]
//! probe = { command = ["pw-cli", "info", "0"], expect = "id: 0" }
//! state_paths = ["/run/user/1000/pipewire-0"]
//! ```
//!
//! All durations are integer milliseconds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::policies::{FailurePolicy, ResetMode, RetryPolicy};
use crate::units::{CommandUnit, ProbeCheck, UnitKind, UnitSpec};

/// Runtime configuration of a stack.
///
/// ## Field semantics
/// - `retry`: default retry policy (per-unit overrides win)
/// - `probe_timeout`: budget for a single probe
/// - `action_timeout`: budget for a single start / stop / reset action
/// - `bring_up_deadline`: overall budget of one `bring_up()` call
/// - `tear_down_deadline`: overall budget of one `tear_down()` call
/// - `failure_policy`: what happens to the rest of the stack once a unit fails
/// - `bus_capacity`: event bus ring buffer size (min 1)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Default probe timeout.
    #[serde(rename = "probe_timeout_ms", with = "serde_millis")]
    pub probe_timeout: Duration,
    /// Default action timeout.
    #[serde(rename = "action_timeout_ms", with = "serde_millis")]
    pub action_timeout: Duration,
    /// Deadline of a whole bring-up.
    #[serde(rename = "bring_up_deadline_ms", with = "serde_millis")]
    pub bring_up_deadline: Duration,
    /// Deadline of a whole tear-down.
    #[serde(rename = "tear_down_deadline_ms", with = "serde_millis")]
    pub tear_down_deadline: Duration,
    /// Stack-wide reaction to failed units.
    pub failure_policy: FailurePolicy,
    /// Capacity of the event bus.
    pub bus_capacity: usize,
}

impl Default for StackConfig {
    /// Default configuration:
    ///
    /// - `retry = RetryPolicy::default()` (3 attempts, 1s ×2 up to 30s)
    /// - `probe_timeout = 5s`, `action_timeout = 30s`
    /// - `bring_up_deadline = 120s`, `tear_down_deadline = 60s`
    /// - `failure_policy = Isolate`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            bring_up_deadline: Duration::from_secs(120),
            tear_down_deadline: Duration::from_secs(60),
            failure_policy: FailurePolicy::default(),
            bus_capacity: 1024,
        }
    }
}

impl StackConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

/// Retry fields a unit may override; unset fields inherit the stack's policy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    /// Total start attempts.
    pub max_attempts: Option<u32>,
    /// Base delay in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Growth factor.
    pub multiplier: Option<f64>,
    /// Delay cap in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Reset-before-retry behavior.
    pub reset: Option<ResetMode>,
}

impl RetryOverride {
    /// Applies the override on top of `base`.
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay: self
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.base_delay),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(base.max_delay),
            reset: self.reset.unwrap_or(base.reset),
        }
    }
}

/// Probe table of a `[[unit]]` entry. Exactly one of `command` / `path_exists`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeEntry {
    /// Command to run.
    pub command: Option<Vec<String>>,
    /// Substring required in the command's stdout.
    pub expect: Option<String>,
    /// Minimum non-empty stdout lines.
    pub min_lines: Option<usize>,
    /// Path that must exist.
    pub path_exists: Option<PathBuf>,
}

/// One `[[unit]]` table.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitEntry {
    /// Unit name.
    pub name: String,
    /// Unit kind.
    #[serde(default)]
    pub kind: UnitKind,
    /// Start command.
    pub start: Option<Vec<String>>,
    /// Stop command.
    pub stop: Option<Vec<String>>,
    /// Reset command.
    pub reset: Option<Vec<String>>,
    /// Health probe.
    pub probe: Option<ProbeEntry>,
    /// Units that must be healthy first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Mutual-exclusion group.
    pub exclusion_group: Option<String>,
    /// Runtime state owned by this unit.
    #[serde(default)]
    pub state_paths: Vec<PathBuf>,
    /// Extra environment, on top of the file-level `[env]`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory of every command.
    pub working_dir: Option<PathBuf>,
    /// Retry overrides.
    pub retry: Option<RetryOverride>,
    /// Probe timeout override.
    pub probe_timeout_ms: Option<u64>,
    /// Action timeout override.
    pub action_timeout_ms: Option<u64>,
}

impl UnitEntry {
    fn invalid(&self, reason: impl Into<String>) -> LoadError {
        LoadError::Invalid {
            unit: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn probe_check(&self) -> Result<ProbeCheck, LoadError> {
        let Some(probe) = &self.probe else {
            return Ok(match (self.kind, self.state_paths.first()) {
                (UnitKind::Socket, Some(path)) => ProbeCheck::PathExists(path.clone()),
                _ => ProbeCheck::Assume,
            });
        };

        match (&probe.command, &probe.path_exists) {
            (Some(argv), None) => {
                if argv.is_empty() {
                    return Err(self.invalid("probe command is empty"));
                }
                Ok(ProbeCheck::Command {
                    argv: argv.clone(),
                    expect: probe.expect.clone(),
                    min_lines: probe.min_lines,
                })
            }
            (None, Some(path)) => Ok(ProbeCheck::PathExists(path.clone())),
            (Some(_), Some(_)) => Err(self.invalid("probe sets both `command` and `path_exists`")),
            (None, None) => Err(self.invalid("probe needs `command` or `path_exists`")),
        }
    }

    /// Builds the unit spec, layering `shared_env` under the unit's own env.
    pub fn to_spec(
        &self,
        shared_env: &BTreeMap<String, String>,
        default_retry: RetryPolicy,
    ) -> Result<UnitSpec, LoadError> {
        for (label, argv) in [
            ("start", &self.start),
            ("stop", &self.stop),
            ("reset", &self.reset),
        ] {
            if argv.as_ref().is_some_and(Vec::is_empty) {
                return Err(self.invalid(format!("{label} command is empty")));
            }
        }

        let mut unit = CommandUnit::new(self.name.clone())
            .with_kind(self.kind)
            .with_probe(self.probe_check()?)
            .envs(shared_env.clone())
            .envs(self.env.clone());
        if let Some(argv) = &self.start {
            unit = unit.start_cmd(argv.clone());
        }
        if let Some(argv) = &self.stop {
            unit = unit.stop_cmd(argv.clone());
        }
        if let Some(argv) = &self.reset {
            unit = unit.reset_cmd(argv.clone());
        }
        if let Some(dir) = &self.working_dir {
            unit = unit.working_dir(dir.clone());
        }

        let mut spec = UnitSpec::new(std::sync::Arc::new(unit)).depends_on(self.depends_on.clone());
        if let Some(group) = &self.exclusion_group {
            spec = spec.exclusion_group(group.clone());
        }
        for path in &self.state_paths {
            spec = spec.state_path(path.clone());
        }
        if let Some(retry) = &self.retry {
            spec = spec.retry(retry.apply(default_retry));
        }
        if let Some(ms) = self.probe_timeout_ms {
            spec = spec.probe_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.action_timeout_ms {
            spec = spec.action_timeout(Duration::from_millis(ms));
        }
        Ok(spec)
    }
}

/// A whole stack definition as read from TOML.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    /// Runtime knobs.
    #[serde(default)]
    pub stack: StackConfig,
    /// Environment shared by every unit's commands.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Unit definitions, in declaration order.
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitEntry>,
}

impl StackFile {
    /// Parses a stack definition from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a stack file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Builds one spec per `[[unit]]`, in declaration order.
    pub fn specs(&self) -> Result<Vec<UnitSpec>, LoadError> {
        self.units
            .iter()
            .map(|entry| entry.to_spec(&self.env, self.stack.retry))
            .collect()
    }
}

/// `Duration` ⇄ integer milliseconds.
pub(crate) mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::DependencyGraph;

    const AUDIO: &str = r#"
        [stack]
        probe_timeout_ms = 2500
        failure_policy = "tear_down"

        [stack.retry]
        max_attempts = 4
        base_delay_ms = 500

        [env]
        XDG_RUNTIME_DIR = "/run/user/1000"

        [[unit]]
        name = "pipewire"
        start = ["systemctl", "--user", "start", "pipewire.service"]
        probe = { command = ["pw-cli", "info", "0"], expect = "id: 0" }
        state_paths = ["/run/user/1000/pipewire-0"]

        [[unit]]
        name = "pipewire-pulse"
        kind = "socket"
        depends_on = ["pipewire"]
        exclusion_group = "pulse-server"
        state_paths = ["/run/user/1000/pulse/native"]
        retry = { max_attempts = 6, reset = "before_every_retry" }
    "#;

    #[test]
    fn parses_audio_stack() {
        let file = StackFile::from_toml(AUDIO).unwrap();
        assert_eq!(file.stack.probe_timeout, Duration::from_millis(2500));
        assert_eq!(file.stack.failure_policy, FailurePolicy::TearDown);
        assert_eq!(file.stack.retry.max_attempts, 4);
        assert_eq!(file.stack.retry.base_delay, Duration::from_millis(500));
        assert_eq!(file.stack.retry.multiplier, 2.0);
        assert_eq!(file.stack.action_timeout, Duration::from_secs(30));
        assert_eq!(file.units.len(), 2);

        let specs = file.specs().unwrap();
        let pulse = &specs[1];
        assert_eq!(pulse.group(), Some("pulse-server"));
        let retry = pulse.retry_override().unwrap();
        assert_eq!(retry.max_attempts, 6);
        assert_eq!(retry.base_delay, Duration::from_millis(500));
        assert_eq!(retry.reset, ResetMode::BeforeEveryRetry);

        let plan = DependencyGraph::load(&specs).unwrap();
        assert_eq!(plan.batches().len(), 2);
    }

    #[test]
    fn socket_units_probe_their_first_state_path() {
        let file = StackFile::from_toml(AUDIO).unwrap();
        let check = file.units[1].probe_check().unwrap();
        assert_eq!(
            check,
            ProbeCheck::PathExists(PathBuf::from("/run/user/1000/pulse/native"))
        );
        assert_eq!(
            file.units[0].probe_check().unwrap(),
            ProbeCheck::Command {
                argv: vec!["pw-cli".into(), "info".into(), "0".into()],
                expect: Some("id: 0".into()),
                min_lines: None,
            }
        );
    }

    #[test]
    fn rejects_ambiguous_probe() {
        let file = StackFile::from_toml(
            r#"
            [[unit]]
            name = "bluetooth"
            probe = { command = ["bluetoothctl", "show"], path_exists = "/run/dbus" }
            "#,
        )
        .unwrap();
        assert!(matches!(file.specs(), Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn rejects_empty_start_command() {
        let file = StackFile::from_toml(
            r#"
            [[unit]]
            name = "bluetooth"
            start = []
            "#,
        )
        .unwrap();
        assert!(matches!(file.specs(), Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = StackFile::from_toml(
            r#"
            [[unit]]
            name = "bluetooth"
            restart = "always"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Parse(_)));
    }

    #[test]
    fn demo_stack_plans() {
        let file = StackFile::from_toml(include_str!("../demos/audio-stack.toml")).unwrap();
        let plan = DependencyGraph::load(&file.specs().unwrap()).unwrap();
        assert_eq!(
            plan.to_string(),
            "batch 0: pipewire, bluetooth\n\
             batch 1: wireplumber, pipewire-pulse, bt-agent\n\
             batch 2: sinks\n"
        );
    }

    #[test]
    fn empty_file_is_default() {
        let file = StackFile::from_toml("").unwrap();
        assert_eq!(file.stack, StackConfig::default());
        assert!(file.units.is_empty());
    }
}
