//! # State reset: clearing a unit's own runtime artifacts.
//!
//! A reset is not a restart. It removes the runtime state a unit declared as its own
//! (sockets, session caches, lock files), then runs the unit's reset hook:
//!
//! ```text
//! reset_state(unit, paths)
//!   ├─► for each declared path: remove file / symlink / directory tree
//!   │     (already absent → nothing to do)
//!   └─► unit.reset(ctx)   bounded by the action budget
//! ```
//!
//! Reset is idempotent: on an already-clean unit it is a no-op. Each state path has
//! exactly one owner (enforced when the graph is built), so a reset never touches
//! another unit's state.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::core::runner::run_action;
use crate::error::ResetError;
use crate::units::{Action, Unit};

/// Clears `paths`, then runs the unit's reset hook within `budget`.
pub async fn reset_state(
    unit: &dyn Unit,
    paths: &[PathBuf],
    budget: Duration,
    parent: &CancellationToken,
) -> Result<(), ResetError> {
    for path in paths {
        remove_path(path).await?;
    }
    run_action(unit, Action::Reset, budget, parent).await?;
    Ok(())
}

async fn remove_path(path: &Path) -> Result<(), ResetError> {
    let io = |source: std::io::Error| ResetError::Io {
        path: path.to_path_buf(),
        source,
    };

    // symlink_metadata: a symlink is removed itself, never followed.
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io(e)),
    };
    let res = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::units::UnitFn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn second_reset_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("pipewire-0");
        let cache = tmp.path().join("pipewire-cache");
        let foreign = tmp.path().join("pulse-native");
        std::fs::write(&socket, b"").unwrap();
        std::fs::create_dir_all(cache.join("sessions")).unwrap();
        std::fs::write(cache.join("sessions/default"), b"state").unwrap();
        std::fs::write(&foreign, b"").unwrap();

        let hooks = Arc::new(AtomicU32::new(0));
        let counter = hooks.clone();
        let unit = UnitFn::new("pipewire").on_reset(move |_ctx: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ActionError>(()) }
        });
        let paths = vec![socket.clone(), cache.clone()];
        let token = CancellationToken::new();

        reset_state(&unit, &paths, Duration::from_secs(5), &token)
            .await
            .unwrap();
        let after_once = listing(tmp.path());

        reset_state(&unit, &paths, Duration::from_secs(5), &token)
            .await
            .unwrap();
        let after_twice = listing(tmp.path());

        assert_eq!(after_once, vec!["pulse-native".to_string()]);
        assert_eq!(after_once, after_twice);
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_paths_are_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let unit = UnitFn::new("bluetooth");
        let paths = vec![tmp.path().join("never-created")];
        let token = CancellationToken::new();
        let res = reset_state(&unit, &paths, Duration::from_secs(5), &token).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn failing_hook_surfaces_as_action_error() {
        let unit = UnitFn::new("wireplumber").on_reset(|_ctx: CancellationToken| async {
            Err(ActionError::failed(Action::Reset, "exit status: 1"))
        });
        let err = reset_state(&unit, &[], Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "reset_action");
    }
}
