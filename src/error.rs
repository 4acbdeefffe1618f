//! Custom error types for the application.
//!
//! `ScopeError` is the crate-wide error. Each layer of the session protocol has
//! its own narrower error that converts into it:
//!
//! - **`Codec`**: a frame could not be decoded (corrupt zlib stream, payload that
//!   is not UTF-8, declared length above the limit). Fatal for the session that
//!   produced it.
//! - **`Io`**: connect/accept/send/receive failures and run-log file errors.
//!   Fatal for the session; there is no reconnect.
//! - **`Config`**: the figment layer could not extract a configuration.
//! - **`Configuration`**: the configuration parsed but is semantically invalid.
//! - **`InstrumentUnavailable`**: the instrument actor has stopped and can no
//!   longer accept requests.
//!
//! Command faults (`CommandError`) and adapter faults never surface here: the
//! dispatcher turns them into `[ERROR]` responses and keeps serving.

use crate::network::codec::CodecError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Codec(#[from] CodecError),

    #[error("Instrument actor is no longer running")]
    InstrumentUnavailable,

    #[error("Session is closed")]
    SessionClosed,
}

impl From<figment::Error> for ScopeError {
    fn from(value: figment::Error) -> Self {
        ScopeError::Config(Box::new(value))
    }
}
