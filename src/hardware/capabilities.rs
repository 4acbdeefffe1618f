//! Oscilloscope capability
//!
//! The session layer never talks to a vendor driver directly. Everything it needs
//! from the instrument is expressed by the [`Oscilloscope`] trait: a set of
//! configuration setters, two housekeeping operations and the primitives the
//! acquisition state machine is built from.
//!
//! # Contract
//!
//! - Every setter returns the *effective* value. Instruments clamp and round, so
//!   callers must store the returned value, not the requested one.
//! - Methods take `&mut self`: the instrument is not reentrant, and exclusive
//!   access is what lets the instrument actor guarantee one call at a time.
//! - Errors use `anyhow::Result`; the dispatcher turns them into
//!   operation-specific `[ERROR]` responses.

use crate::instrument::{Channel, TriggerCoupling, TriggerMode, TriggerSlope};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability: remote-controlled oscilloscope.
#[async_trait]
pub trait Oscilloscope: Send {
    /// Horizontal scale, seconds per division.
    async fn set_time_scale(&mut self, seconds_per_div: f64) -> Result<f64>;

    /// Horizontal offset in seconds.
    async fn set_time_offset(&mut self, seconds: f64) -> Result<f64>;

    /// Vertical scale of `channel`, volts per division.
    async fn set_vertical_scale(&mut self, channel: Channel, volts_per_div: f64) -> Result<f64>;

    /// Number of samples returned by the next data read, applied to both channels.
    async fn set_samples_per_read(&mut self, samples: u32) -> Result<u32>;

    /// Sampling rate in Hz.
    async fn set_sampling_rate(&mut self, hz: u64) -> Result<u64>;

    async fn set_trigger_source(&mut self, channel: Channel) -> Result<Channel>;

    /// Trigger level in volts.
    async fn set_trigger_level(&mut self, volts: f64) -> Result<f64>;

    async fn set_trigger_coupling(&mut self, coupling: TriggerCoupling) -> Result<TriggerCoupling>;

    async fn set_trigger_slope(&mut self, slope: TriggerSlope) -> Result<TriggerSlope>;

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<TriggerMode>;

    /// Let the instrument pick scales and trigger settings for the present signal.
    async fn auto_setup(&mut self) -> Result<()>;

    /// Close the instrument application.
    async fn shutdown(&mut self) -> Result<()>;

    /// Current result array of `channel`.
    async fn data_array(&mut self, channel: Channel) -> Result<Vec<f64>>;

    /// Block until a trigger event completes an acquisition or `timeout` elapses.
    ///
    /// # Returns
    /// - `Ok(true)` if the instrument triggered
    /// - `Ok(false)` on timeout
    /// - `Err` on communication faults
    async fn acquire(&mut self, timeout: Duration) -> Result<bool>;
}
