//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`] so that every recovery loop, the
//! sequencer and the controller can publish without blocking each other.
//!
//! ```text
//! Publishers (many):                  Listener (one):
//!   recovery loop (unit A) ──┐
//!   recovery loop (unit B) ──┼──► Bus ──► controller listener ──► SubscriberSet
//!   sequencer / controller ──┘
//! ```
//!
//! ## Rules
//! - `publish()` never blocks; with no receivers the event is dropped.
//! - One shared ring buffer; a receiver that falls behind sees `Lagged(n)` and
//!   skips the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribing() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::BringUpStarted));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::UnitStarting).with_unit("pipewire"));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::UnitStarting);
        assert_eq!(ev.unit.as_deref(), Some("pipewire"));
    }
}
