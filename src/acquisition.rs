//! Acquisition and trigger sequencing.
//!
//! Two read modes, mutually exclusive per call:
//!
//! - **Immediate read** ([`Acquisition::read_once`]): re-applies the configured
//!   sampling rate and sample count, then reads one channel. The trigger mode is
//!   not touched.
//! - **Triggered read** ([`Acquisition::read_around_trigger`]):
//!
//! ```text
//! Idle ──arm (mode=single)──▶ Armed ──acquire──┬─▶ Triggered ──mode=auto──▶ Idle
//!                                              └─▶ TimedOut ──────────────▶ Idle (mode stays single)
//! ```
//!
//! Every mode change stores the mode echoed by the instrument in the
//! [`InstrumentConfig`]. Restoring `auto` after a timeout is opt-in through
//! [`AcquisitionSettings::restore_auto_on_timeout`].

use crate::hardware::capabilities::Oscilloscope;
use crate::instrument::{Channel, InstrumentConfig, TriggerMode, WaveformCapture};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Default wait for a trigger event during a triggered read.
pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub trigger_timeout: Duration,
    /// Put the trigger mode back to `auto` when a triggered read times out.
    pub restore_auto_on_timeout: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
            restore_auto_on_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Armed,
    Triggered,
    TimedOut,
}

/// Result of a triggered read.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Triggered {
        ch1: WaveformCapture,
        ch2: WaveformCapture,
    },
    TimedOut,
}

impl TriggerOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, TriggerOutcome::TimedOut)
    }

    /// Both channels' captures; a timeout yields the empty sentinel pair.
    pub fn into_pair(self) -> (WaveformCapture, WaveformCapture) {
        match self {
            TriggerOutcome::Triggered { ch1, ch2 } => (ch1, ch2),
            TriggerOutcome::TimedOut => (
                WaveformCapture::empty(Channel::C1),
                WaveformCapture::empty(Channel::C2),
            ),
        }
    }
}

/// Trigger state machine. Owned by the instrument actor alongside the scope.
#[derive(Debug)]
pub struct Acquisition {
    settings: AcquisitionSettings,
    state: AcquisitionState,
}

impl Acquisition {
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            settings,
            state: AcquisitionState::Idle,
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    fn transition(&mut self, next: AcquisitionState) {
        debug!(from = ?self.state, to = ?next, "Acquisition state change");
        self.state = next;
    }

    /// Read one channel without waiting for a trigger.
    pub async fn read_once<S>(
        &mut self,
        scope: &mut S,
        config: &mut InstrumentConfig,
        channel: Channel,
    ) -> Result<WaveformCapture>
    where
        S: Oscilloscope + ?Sized,
    {
        config.sampling_rate = scope
            .set_sampling_rate(config.sampling_rate)
            .await
            .context("Failed to apply sampling rate")?;
        config.samples = scope
            .set_samples_per_read(config.samples)
            .await
            .context("Failed to apply samples per read")?;

        let samples = scope
            .data_array(channel)
            .await
            .with_context(|| format!("Failed to read {} data array", channel))?;
        Ok(WaveformCapture::new(channel, samples))
    }

    /// Arm in `single` mode, wait for a trigger, read both channels.
    ///
    /// On error the state machine returns to `Idle`; `config` keeps whatever
    /// mode the instrument last confirmed.
    pub async fn read_around_trigger<S>(
        &mut self,
        scope: &mut S,
        config: &mut InstrumentConfig,
    ) -> Result<TriggerOutcome>
    where
        S: Oscilloscope + ?Sized,
    {
        let result = self.run_trigger_sequence(scope, config).await;
        self.transition(AcquisitionState::Idle);
        result
    }

    async fn run_trigger_sequence<S>(
        &mut self,
        scope: &mut S,
        config: &mut InstrumentConfig,
    ) -> Result<TriggerOutcome>
    where
        S: Oscilloscope + ?Sized,
    {
        config.trigger_mode = scope
            .set_trigger_mode(TriggerMode::Single)
            .await
            .context("Failed to arm single trigger")?;
        self.transition(AcquisitionState::Armed);

        let triggered = scope
            .acquire(self.settings.trigger_timeout)
            .await
            .context("Acquisition failed")?;

        if !triggered {
            self.transition(AcquisitionState::TimedOut);
            warn!(
                timeout_secs = self.settings.trigger_timeout.as_secs_f64(),
                "Trigger acquisition timed out"
            );
            if self.settings.restore_auto_on_timeout {
                config.trigger_mode = scope
                    .set_trigger_mode(TriggerMode::Auto)
                    .await
                    .context("Failed to restore auto trigger")?;
            }
            return Ok(TriggerOutcome::TimedOut);
        }

        self.transition(AcquisitionState::Triggered);
        let ch1 = scope
            .data_array(Channel::C1)
            .await
            .context("Failed to read C1 data array")?;
        let ch2 = scope
            .data_array(Channel::C2)
            .await
            .context("Failed to read C2 data array")?;
        config.trigger_mode = scope
            .set_trigger_mode(TriggerMode::Auto)
            .await
            .context("Failed to restore auto trigger")?;

        Ok(TriggerOutcome::Triggered {
            ch1: WaveformCapture::new(Channel::C1, ch1),
            ch2: WaveformCapture::new(Channel::C2, ch2),
        })
    }
}
