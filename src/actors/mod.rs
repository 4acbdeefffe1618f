//! Actor-based ownership of the instrument.
//!
//! The oscilloscope lives inside a single task; callers hold a cloneable
//! [`ScopeHandle`] and exchange request/response pairs over mpsc + oneshot.

pub mod scope_actor;

pub use scope_actor::{ScopeActor, ScopeHandle, ScopeRequest, DEFAULT_QUEUE_CAPACITY};
