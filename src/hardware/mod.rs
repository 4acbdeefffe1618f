//! Instrument abstraction.
//!
//! `capabilities` defines what the session layer needs from an oscilloscope;
//! `mock` provides a simulated one.

pub mod capabilities;
pub mod mock;

pub use capabilities::Oscilloscope;
pub use mock::{MockOperation, MockScope, TriggerBehavior};
