//! # Command-backed unit.
//!
//! [`CommandUnit`] drives an OS service through argv-style commands, e.g.
//! `systemctl --user start pipewire.service`, and probes it either through a CLI
//! query (`pw-cli info 0`, `bluetoothctl show`) or by checking that a runtime
//! socket exists.
//!
//! Commands run with an explicit environment and working directory supplied at
//! construction time; nothing is inherited from process-wide mutable state except
//! the parent environment itself. Children are spawned with `kill_on_drop`, so a
//! command abandoned by a timeout is killed rather than leaked.
//!
//! ## Example
//! ```rust
//! use stackvisor::{CommandUnit, ProbeCheck, UnitKind};
//!
//! let wireplumber = CommandUnit::new("wireplumber")
//!     .with_kind(UnitKind::Daemon)
//!     .start_cmd(["systemctl", "--user", "start", "wireplumber.service"])
//!     .stop_cmd(["systemctl", "--user", "stop", "wireplumber.service"])
//!     .with_probe(ProbeCheck::Command {
//!         argv: vec!["wpctl".into(), "status".into()],
//!         expect: Some("Sinks:".into()),
//!         min_lines: None,
//!     })
//!     .env("XDG_RUNTIME_DIR", "/run/user/1000");
//!
//! assert_eq!(wireplumber.name(), "wireplumber");
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ActionError, ProbeFailure};
use crate::units::unit::{Action, Unit, UnitKind};

/// Longest stderr/stdout excerpt carried in failure reasons.
const EXCERPT_LEN: usize = 200;

/// How a [`CommandUnit`] decides it is healthy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeCheck {
    /// No probe: the unit counts as healthy once its start action succeeded.
    Assume,
    /// Run a command; healthy if it exits with status 0 and the optional
    /// stdout expectations hold.
    Command {
        /// Command and arguments.
        argv: Vec<String>,
        /// Substring that must appear in stdout.
        expect: Option<String>,
        /// Minimum number of non-empty stdout lines (e.g. "at least one sink").
        min_lines: Option<usize>,
    },
    /// Healthy if the path exists (typically a listening socket).
    PathExists(PathBuf),
}

/// Unit whose actions are external commands.
#[derive(Clone, Debug)]
pub struct CommandUnit {
    name: String,
    kind: UnitKind,
    start: Option<Vec<String>>,
    stop: Option<Vec<String>>,
    reset: Option<Vec<String>>,
    probe: ProbeCheck,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandUnit {
    /// Creates a unit with no commands and an assumed-healthy probe.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::default(),
            start: None,
            stop: None,
            reset: None,
            probe: ProbeCheck::Assume,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Returns the unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the unit kind.
    pub fn with_kind(mut self, kind: UnitKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the start command.
    pub fn start_cmd<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the stop command.
    pub fn stop_cmd<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the reset command.
    pub fn reset_cmd<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reset = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the probe.
    pub fn with_probe(mut self, probe: ProbeCheck) -> Self {
        self.probe = probe;
        self
    }

    /// Adds one environment variable for every command of this unit.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the working directory for every command of this unit.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Spawns `argv` and waits for it, giving up if `ctx` is cancelled.
    async fn exec(&self, argv: &[String], ctx: &CancellationToken) -> Result<Output, String> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tokio::select! {
            out = cmd.output() => out.map_err(|e| format!("cannot run '{program}': {e}")),
            _ = ctx.cancelled() => Err(format!("'{program}' cancelled")),
        }
    }

    async fn run_action(
        &self,
        action: Action,
        argv: Option<&Vec<String>>,
        ctx: CancellationToken,
    ) -> Result<(), ActionError> {
        let Some(argv) = argv else {
            return Ok(());
        };
        let output = self
            .exec(argv, &ctx)
            .await
            .map_err(|reason| ActionError::Spawn { action, reason })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ActionError::failed(action, describe_failure(&output)))
        }
    }
}

#[async_trait]
impl Unit for CommandUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> UnitKind {
        self.kind
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        self.run_action(Action::Start, self.start.as_ref(), ctx).await
    }

    async fn stop(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        self.run_action(Action::Stop, self.stop.as_ref(), ctx).await
    }

    async fn reset(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        self.run_action(Action::Reset, self.reset.as_ref(), ctx).await
    }

    async fn probe(&self, ctx: CancellationToken) -> Result<(), ProbeFailure> {
        let unhealthy = |reason: String| ProbeFailure::Unhealthy { reason };

        match &self.probe {
            ProbeCheck::Assume => Ok(()),
            ProbeCheck::PathExists(path) => match tokio::fs::try_exists(path).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(unhealthy(format!("{} does not exist", path.display()))),
                Err(e) => Err(unhealthy(format!("cannot stat {}: {e}", path.display()))),
            },
            ProbeCheck::Command {
                argv,
                expect,
                min_lines,
            } => {
                let output = self.exec(argv, &ctx).await.map_err(unhealthy)?;
                if !output.status.success() {
                    return Err(unhealthy(describe_failure(&output)));
                }
                let stdout = String::from_utf8_lossy(&output.stdout);

                if let Some(needle) = expect {
                    if !stdout.contains(needle.as_str()) {
                        return Err(unhealthy(format!("output does not contain {needle:?}")));
                    }
                }
                if let Some(min) = min_lines {
                    let lines = stdout.lines().filter(|l| !l.trim().is_empty()).count();
                    if lines < *min {
                        return Err(unhealthy(format!(
                            "expected at least {min} line(s) of output, got {lines}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Renders a failed command as `exit status N: <last stderr line>`.
fn describe_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    if detail.is_empty() {
        output.status.to_string()
    } else {
        let excerpt: String = detail.chars().take(EXCERPT_LEN).collect();
        format!("{}: {excerpt}", output.status)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn start_reports_exit_status_and_stderr() {
        let unit = CommandUnit::new("broken").start_cmd(sh("echo 'unit not found' >&2; exit 5"));
        let err = unit.start(CancellationToken::new()).await.unwrap_err();

        match err {
            ActionError::Failed { action, reason } => {
                assert_eq!(action, Action::Start);
                assert!(reason.contains("unit not found"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let unit = CommandUnit::new("ghost").start_cmd(["/nonexistent/stackvisor-test-binary"]);
        let err = unit.start(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.as_label(), "action_spawn");
    }

    #[tokio::test]
    async fn unset_actions_are_noops() {
        let unit = CommandUnit::new("bare");
        assert!(unit.stop(CancellationToken::new()).await.is_ok());
        assert!(unit.probe(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn probe_checks_expected_output() {
        let healthy = CommandUnit::new("core").with_probe(ProbeCheck::Command {
            argv: sh("echo 'id: 0, type PipeWire:Interface:Core'"),
            expect: Some("id: 0".into()),
            min_lines: None,
        });
        assert!(healthy.probe(CancellationToken::new()).await.is_ok());

        let wrong = CommandUnit::new("core").with_probe(ProbeCheck::Command {
            argv: sh("echo 'connection refused'"),
            expect: Some("id: 0".into()),
            min_lines: None,
        });
        assert!(matches!(
            wrong.probe(CancellationToken::new()).await,
            Err(ProbeFailure::Unhealthy { .. })
        ));
    }

    #[tokio::test]
    async fn probe_counts_output_lines() {
        let unit = CommandUnit::new("sinks").with_probe(ProbeCheck::Command {
            argv: sh("printf 'sink-a\\n\\n'"),
            expect: None,
            min_lines: Some(2),
        });
        let err = unit.probe(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("got 1"), "{err}");
    }

    #[tokio::test]
    async fn probe_uses_explicit_env() {
        let unit = CommandUnit::new("env")
            .env("STACKVISOR_TEST_RUNTIME_DIR", "/run/user/4242")
            .with_probe(ProbeCheck::Command {
                argv: sh("echo $STACKVISOR_TEST_RUNTIME_DIR"),
                expect: Some("/run/user/4242".into()),
                min_lines: None,
            });
        assert!(unit.probe(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn path_probe_checks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("pipewire-0");
        let unit = CommandUnit::new("socket").with_probe(ProbeCheck::PathExists(socket.clone()));

        assert!(unit.probe(CancellationToken::new()).await.is_err());
        std::fs::write(&socket, b"").unwrap();
        assert!(unit.probe(CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_command_is_abandoned() {
        let unit = CommandUnit::new("hang").start_cmd(sh("sleep 30"));
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = unit.start(ctx).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"), "{err}");
    }
}
