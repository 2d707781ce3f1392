//! # Closure-backed unit (`UnitFn`)
//!
//! [`UnitFn`] assembles a [`Unit`] from closures, one per action. Each closure
//! produces a fresh future per call, so no hidden state is shared between attempts;
//! if an action needs shared state (a connection, a counter), capture an `Arc<...>`
//! explicitly. Environment such as runtime directories or bus addresses should be
//! captured the same way at construction time rather than read from the process
//! environment.
//!
//! Unset actions succeed immediately; an unset probe reports healthy.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use stackvisor::{ActionError, ProbeFailure, UnitFn, UnitKind, UnitRef};
//!
//! let unit: UnitRef = UnitFn::new("pipewire")
//!     .with_kind(UnitKind::Daemon)
//!     .on_start(|_ctx: CancellationToken| async { Ok::<_, ActionError>(()) })
//!     .on_probe(|_ctx: CancellationToken| async { Ok::<_, ProbeFailure>(()) })
//!     .arc();
//!
//! assert_eq!(unit.name(), "pipewire");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{ActionError, ProbeFailure};
use crate::units::unit::{Unit, UnitKind};

type ActionFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), ActionError>> + Send + Sync>;
type ProbeFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), ProbeFailure>> + Send + Sync>;

/// Function-backed unit implementation.
pub struct UnitFn {
    name: Cow<'static, str>,
    kind: UnitKind,
    start: Option<ActionFn>,
    stop: Option<ActionFn>,
    reset: Option<ActionFn>,
    probe: Option<ProbeFn>,
}

impl UnitFn {
    /// Creates a unit whose actions all succeed immediately.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::default(),
            start: None,
            stop: None,
            reset: None,
            probe: None,
        }
    }

    /// Sets the unit kind.
    pub fn with_kind(mut self, kind: UnitKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the start action.
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.start = Some(action(f));
        self
    }

    /// Sets the stop action.
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.stop = Some(action(f));
        self
    }

    /// Sets the reset hook.
    pub fn on_reset<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        self.reset = Some(action(f));
        self
    }

    /// Sets the health probe.
    pub fn on_probe<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProbeFailure>> + Send + 'static,
    {
        self.probe = Some(Arc::new(move |ctx: CancellationToken| f(ctx).boxed()));
        self
    }

    /// Wraps the unit into a shared handle.
    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn action<F, Fut>(f: F) -> ActionFn
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    Arc::new(move |ctx: CancellationToken| f(ctx).boxed())
}

#[async_trait]
impl Unit for UnitFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> UnitKind {
        self.kind
    }

    async fn start(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        match &self.start {
            Some(f) => f(ctx).await,
            None => Ok(()),
        }
    }

    async fn stop(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        match &self.stop {
            Some(f) => f(ctx).await,
            None => Ok(()),
        }
    }

    async fn probe(&self, ctx: CancellationToken) -> Result<(), ProbeFailure> {
        match &self.probe {
            Some(f) => f(ctx).await,
            None => Ok(()),
        }
    }

    async fn reset(&self, ctx: CancellationToken) -> Result<(), ActionError> {
        match &self.reset {
            Some(f) => f(ctx).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Action;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn unset_actions_succeed() {
        let unit = UnitFn::new("noop");
        let ctx = CancellationToken::new();
        assert!(unit.start(ctx.clone()).await.is_ok());
        assert!(unit.stop(ctx.clone()).await.is_ok());
        assert!(unit.reset(ctx.clone()).await.is_ok());
        assert!(unit.probe(ctx).await.is_ok());
        assert_eq!(unit.kind(), UnitKind::Daemon);
    }

    #[tokio::test]
    async fn closures_run_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let unit = UnitFn::new("counter").on_start(move |_ctx| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ActionError::failed(Action::Start, "first call fails"))
                } else {
                    Ok(())
                }
            }
        });

        let ctx = CancellationToken::new();
        assert!(unit.start(ctx.clone()).await.is_err());
        assert!(unit.start(ctx).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
