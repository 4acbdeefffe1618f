//! # scope_link
//!
//! Remote control of a two-channel bench oscilloscope over TCP. A server runs
//! next to the instrument; a client sends colon-delimited commands and keeps
//! a mirror of the instrument configuration from the server's
//! acknowledgements. Every frame on the wire is a big-endian `u32` length
//! followed by zlib-compressed UTF-8 text.
//!
//! ## Crate Structure
//!
//! - **`network`**: framing codec, text protocol, the server dispatcher
//!   (`DispatchServer`) and the client session (`ClientSession`).
//! - **`actors`**: the instrument actor; the only task that touches the
//!   oscilloscope.
//! - **`acquisition`**: immediate and triggered reads, including the
//!   arm/acquire/restore trigger sequence.
//! - **`hardware`**: the `Oscilloscope` capability trait and `MockScope`.
//! - **`instrument`**: configuration model shared by both ends.
//! - **`data`**: the client's per-run files.
//! - **`config`**, **`tracing_init`**, **`error`**: ambient plumbing.

pub mod acquisition;
pub mod actors;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod network;
pub mod tracing_init;
