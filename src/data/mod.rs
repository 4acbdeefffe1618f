//! Data persistence.
pub mod run_log;

pub use run_log::{RunLog, RunStamp};
