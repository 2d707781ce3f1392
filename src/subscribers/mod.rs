//! # Event subscribers for the stackvisor runtime.
//!
//! ```text
//! recovery loops ── publish(Event) ──► Bus ──► controller listener ──► SubscriberSet
//!                                                                  ┌────────┼────────┐
//!                                                                  ▼        ▼        ▼
//!                                                             LogWriter  Metrics  Custom
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] non-blocking fan-out with per-subscriber queues
//! - [`LogWriter`] built-in tracing renderer (feature `logging`)

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
