//! # Subscribe: hooking into runtime events.
//!
//! Anything that wants to react to a stack's life (a log sink, a status LED, a
//! push to the host's HTTP API) implements [`Subscribe`] and is handed to
//! [`StackBuilder::with_subscribers`](crate::StackBuilder::with_subscribers).
//!
//! The [`SubscriberSet`](crate::SubscriberSet) runs every subscriber on its own
//! worker, behind its own bounded queue of [`Subscribe::queue_capacity`] events. A
//! subscriber that falls behind loses events (reported as `SubscriberOverflow`);
//! one that panics is reported as `SubscriberPanicked` and keeps receiving.
//! Neither ever slows a bring-up down.
//!
//! ## Example
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use async_trait::async_trait;
//! use stackvisor::{Event, EventKind, Subscribe};
//!
//! #[derive(Default)]
//! struct FailureCounter(AtomicU32);
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::UnitFailed {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failure-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Receiver of runtime events.
///
/// `on_event` is called once per event, in publication order, never concurrently
/// with itself. Keep it non-blocking and handle errors inside.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and in overflow / panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue length for this subscriber (at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
