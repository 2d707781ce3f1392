//! # Managed units and their specifications.
//!
//! - [`Unit`] - trait for a controllable OS service (start / stop / probe / reset)
//! - [`UnitFn`] - closure-backed implementation
//! - [`CommandUnit`] - implementation driving external commands
//! - [`UnitSpec`] - a unit plus its placement in the stack and policy overrides

mod command;
mod spec;
mod unit;
mod unit_fn;

pub use command::{CommandUnit, ProbeCheck};
pub use spec::UnitSpec;
pub use unit::{Action, Unit, UnitKind, UnitRef};
pub use unit_fn::UnitFn;
