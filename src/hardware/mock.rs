//! Mock Hardware Implementations
//!
//! `MockScope` is a simulated two-channel oscilloscope used by the `server`
//! binary (no vendor driver is bundled) and by the test suite. All waits use
//! `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Behaviour
//!
//! - Setters clamp to the ranges below and echo the clamped value
//! - Sampling rate is rounded to a whole kHz
//! - `acquire` triggers according to [`TriggerBehavior`]
//! - Any operation can be made to fail with [`MockScope::fail_on`]
//! - Clones share state, so a test can keep a clone to inspect calls
//!
//! | setting | range |
//! |---|---|
//! | time scale | 1e-9 ..= 100 s/div |
//! | time offset | -1000 ..= 1000 s |
//! | vertical scale | 0.002 ..= 10 V/div |
//! | samples per read | 2 ..= 10_000_000 |
//! | sampling rate | 1 kHz ..= 10 GHz |
//! | trigger level | -10 ..= 10 V |

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use crate::hardware::capabilities::Oscilloscope;
use crate::instrument::{Channel, InstrumentConfig, TriggerCoupling, TriggerMode, TriggerSlope};

const TIME_SCALE_RANGE: (f64, f64) = (1e-9, 100.0);
const TIME_OFFSET_RANGE: (f64, f64) = (-1000.0, 1000.0);
const VERTICAL_SCALE_RANGE: (f64, f64) = (0.002, 10.0);
const SAMPLES_RANGE: (u32, u32) = (2, 10_000_000);
const SAMPLING_RATE_RANGE: (u64, u64) = (1_000, 10_000_000_000);
const TRIGGER_LEVEL_RANGE: (f64, f64) = (-10.0, 10.0);

/// How the simulated trigger circuit responds to `acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerBehavior {
    /// Trigger as soon as the scope is armed.
    Immediate,
    /// Trigger after the given delay; times out if the delay exceeds the budget.
    After(Duration),
    /// Never trigger; every acquisition runs into its timeout.
    Never,
}

/// Operations that can be selected for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    TimeScale,
    TimeOffset,
    VerticalScale,
    SamplesPerRead,
    SamplingRate,
    TriggerSource,
    TriggerLevel,
    TriggerCoupling,
    TriggerSlope,
    TriggerMode,
    AutoSetup,
    Shutdown,
    DataArray,
    Acquire,
}

#[derive(Debug)]
struct MockState {
    settings: InstrumentConfig,
    trigger: TriggerBehavior,
    failing: HashSet<MockOperation>,
    calls: usize,
    acquisitions: usize,
    shut_down: bool,
}

/// Simulated oscilloscope.
///
/// # Example
///
/// ```rust,ignore
/// let scope = MockScope::new().with_trigger(TriggerBehavior::Never);
/// let scope_view = scope.clone();
/// // hand `scope` to the instrument actor, inspect `scope_view` afterwards
/// assert_eq!(scope_view.call_count().await, 0);
/// ```
#[derive(Clone)]
pub struct MockScope {
    state: Arc<Mutex<MockState>>,
}

impl MockScope {
    /// New scope at power-on defaults that triggers immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                settings: InstrumentConfig::default(),
                trigger: TriggerBehavior::Immediate,
                failing: HashSet::new(),
                calls: 0,
                acquisitions: 0,
                shut_down: false,
            })),
        }
    }

    /// Builder-style trigger behaviour. Must be called before the scope is shared.
    pub fn with_trigger(self, trigger: TriggerBehavior) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.trigger = trigger;
        }
        self
    }

    pub async fn set_trigger_behavior(&self, trigger: TriggerBehavior) {
        self.state.lock().await.trigger = trigger;
    }

    /// Make every subsequent call of `operation` fail.
    pub async fn fail_on(&self, operation: MockOperation) {
        self.state.lock().await.failing.insert(operation);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    /// Number of trait calls received so far, failed ones included.
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls
    }

    /// Number of triggered acquisitions completed.
    pub async fn acquisitions(&self) -> usize {
        self.state.lock().await.acquisitions
    }

    /// Settings as currently applied inside the simulated instrument.
    pub async fn settings(&self) -> InstrumentConfig {
        self.state.lock().await.settings.clone()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.state.lock().await.shut_down
    }

    /// Count the call and fail it if injected, returning the locked state.
    async fn enter(&self, operation: MockOperation) -> Result<tokio::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().await;
        state.calls += 1;
        if state.failing.contains(&operation) {
            return Err(anyhow!("MockScope: simulated {:?} failure", operation));
        }
        Ok(state)
    }
}

impl Default for MockScope {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.clamp(lo, hi)
}

/// Deterministic test waveform: a sine whose amplitude follows the vertical
/// scale and whose phase differs per channel.
fn synthesize(channel: Channel, settings: &InstrumentConfig) -> Vec<f64> {
    let amplitude = settings.vertical_scale(channel) * 2.0;
    let phase = match channel {
        Channel::C1 => 0.0,
        Channel::C2 => std::f64::consts::FRAC_PI_2,
    };
    let period = 1000.0;
    (0..settings.samples)
        .map(|i| amplitude * (2.0 * std::f64::consts::PI * f64::from(i) / period + phase).sin())
        .collect()
}

#[async_trait]
impl Oscilloscope for MockScope {
    async fn set_time_scale(&mut self, seconds_per_div: f64) -> Result<f64> {
        let mut state = self.enter(MockOperation::TimeScale).await?;
        state.settings.time_scale = clamp(seconds_per_div, TIME_SCALE_RANGE);
        Ok(state.settings.time_scale)
    }

    async fn set_time_offset(&mut self, seconds: f64) -> Result<f64> {
        let mut state = self.enter(MockOperation::TimeOffset).await?;
        state.settings.horizontal_offset = clamp(seconds, TIME_OFFSET_RANGE);
        Ok(state.settings.horizontal_offset)
    }

    async fn set_vertical_scale(&mut self, channel: Channel, volts_per_div: f64) -> Result<f64> {
        let mut state = self.enter(MockOperation::VerticalScale).await?;
        let applied = clamp(volts_per_div, VERTICAL_SCALE_RANGE);
        state.settings.set_vertical_scale(channel, applied);
        Ok(applied)
    }

    async fn set_samples_per_read(&mut self, samples: u32) -> Result<u32> {
        let mut state = self.enter(MockOperation::SamplesPerRead).await?;
        state.settings.samples = samples.clamp(SAMPLES_RANGE.0, SAMPLES_RANGE.1);
        Ok(state.settings.samples)
    }

    async fn set_sampling_rate(&mut self, hz: u64) -> Result<u64> {
        let mut state = self.enter(MockOperation::SamplingRate).await?;
        let rounded = hz.saturating_add(500) / 1_000 * 1_000;
        state.settings.sampling_rate = rounded.clamp(SAMPLING_RATE_RANGE.0, SAMPLING_RATE_RANGE.1);
        Ok(state.settings.sampling_rate)
    }

    async fn set_trigger_source(&mut self, channel: Channel) -> Result<Channel> {
        let mut state = self.enter(MockOperation::TriggerSource).await?;
        state.settings.trigger_source = channel;
        Ok(channel)
    }

    async fn set_trigger_level(&mut self, volts: f64) -> Result<f64> {
        let mut state = self.enter(MockOperation::TriggerLevel).await?;
        state.settings.trigger_level = clamp(volts, TRIGGER_LEVEL_RANGE);
        Ok(state.settings.trigger_level)
    }

    async fn set_trigger_coupling(&mut self, coupling: TriggerCoupling) -> Result<TriggerCoupling> {
        let mut state = self.enter(MockOperation::TriggerCoupling).await?;
        state.settings.trigger_coupling = coupling;
        Ok(coupling)
    }

    async fn set_trigger_slope(&mut self, slope: TriggerSlope) -> Result<TriggerSlope> {
        let mut state = self.enter(MockOperation::TriggerSlope).await?;
        state.settings.trigger_slope = slope;
        Ok(slope)
    }

    async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<TriggerMode> {
        let mut state = self.enter(MockOperation::TriggerMode).await?;
        state.settings.trigger_mode = mode;
        Ok(mode)
    }

    async fn auto_setup(&mut self) -> Result<()> {
        let mut state = self.enter(MockOperation::AutoSetup).await?;
        state.settings.time_scale = 1e-3;
        state.settings.c1_vertical_scale = 0.5;
        state.settings.c2_vertical_scale = 0.5;
        state.settings.trigger_level = 0.0;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let mut state = self.enter(MockOperation::Shutdown).await?;
        state.shut_down = true;
        Ok(())
    }

    async fn data_array(&mut self, channel: Channel) -> Result<Vec<f64>> {
        let state = self.enter(MockOperation::DataArray).await?;
        Ok(synthesize(channel, &state.settings))
    }

    async fn acquire(&mut self, timeout: Duration) -> Result<bool> {
        let trigger = {
            let state = self.enter(MockOperation::Acquire).await?;
            state.trigger
        };

        let triggered = match trigger {
            TriggerBehavior::Immediate => true,
            TriggerBehavior::After(delay) if delay <= timeout => {
                sleep(delay).await;
                true
            }
            TriggerBehavior::After(_) | TriggerBehavior::Never => {
                sleep(timeout).await;
                false
            }
        };

        if triggered {
            self.state.lock().await.acquisitions += 1;
        }
        Ok(triggered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setters_echo_clamped_values() {
        let mut scope = MockScope::new();
        assert_eq!(scope.set_vertical_scale(Channel::C1, 25.0).await.unwrap(), 10.0);
        assert_eq!(scope.set_vertical_scale(Channel::C2, 0.5).await.unwrap(), 0.5);
        assert_eq!(scope.set_sampling_rate(1_234_567).await.unwrap(), 1_235_000);
        assert_eq!(scope.set_trigger_level(-40.0).await.unwrap(), -10.0);

        let settings = scope.settings().await;
        assert_eq!(settings.c1_vertical_scale, 10.0);
        assert_eq!(settings.c2_vertical_scale, 0.5);
        assert_eq!(scope.call_count().await, 4);
    }

    #[tokio::test]
    async fn test_data_array_follows_samples_setting() {
        let mut scope = MockScope::new();
        scope.set_samples_per_read(64).await.unwrap();
        let c1 = scope.data_array(Channel::C1).await.unwrap();
        let c2 = scope.data_array(Channel::C2).await.unwrap();
        assert_eq!(c1.len(), 64);
        assert_eq!(c2.len(), 64);
        assert_ne!(c1, c2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mut scope = MockScope::new();
        let scope_view = scope.clone();
        scope_view.fail_on(MockOperation::TimeScale).await;

        assert!(scope.set_time_scale(0.1).await.is_err());
        assert_eq!(scope_view.settings().await.time_scale, 1.0);

        scope_view.clear_failures().await;
        assert_eq!(scope.set_time_scale(0.1).await.unwrap(), 0.1);
        assert_eq!(scope_view.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_acquire_behaviours() {
        let mut scope = MockScope::new();
        assert!(scope.acquire(Duration::from_millis(10)).await.unwrap());

        scope.set_trigger_behavior(TriggerBehavior::Never).await;
        assert!(!scope.acquire(Duration::from_millis(10)).await.unwrap());

        scope
            .set_trigger_behavior(TriggerBehavior::After(Duration::from_millis(5)))
            .await;
        assert!(scope.acquire(Duration::from_millis(50)).await.unwrap());
        assert!(!scope.acquire(Duration::from_millis(1)).await.unwrap());

        assert_eq!(scope.acquisitions().await, 2);
    }

    #[test]
    fn test_builder_sets_trigger() {
        let scope = MockScope::new().with_trigger(TriggerBehavior::Never);
        let trigger = tokio_test::block_on(async { scope.state.lock().await.trigger });
        assert_eq!(trigger, TriggerBehavior::Never);
    }
}
