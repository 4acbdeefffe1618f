//! Instrument actor.
//!
//! The oscilloscope is not reentrant, so exactly one task owns it. Everything
//! else talks to that task through a [`ScopeHandle`]:
//!
//! ```text
//! Dispatcher                          ScopeActor task
//! ----------                          ---------------
//! 1. Create request with oneshot
//! 2. Send via mpsc channel    ------>
//!                                     3. Receive request
//!                                     4. Call the instrument, update config
//!                                     5. Send response messages
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Requests are served strictly in arrival order, so no two instrument calls
//! are ever in flight at the same time.

use crate::acquisition::{Acquisition, AcquisitionSettings};
use crate::error::{ScopeError, ScopeResult};
use crate::hardware::capabilities::Oscilloscope;
use crate::instrument::InstrumentConfig;
use crate::network::protocol::{Command, InfoField, Message};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default capacity of the actor's request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Requests understood by the instrument actor.
#[derive(Debug)]
pub enum ScopeRequest {
    /// Run one operator command and reply with the response messages.
    Execute {
        command: Command,
        response: oneshot::Sender<Vec<Message>>,
    },
    /// Reply with the current authoritative configuration.
    Snapshot {
        response: oneshot::Sender<InstrumentConfig>,
    },
}

impl ScopeRequest {
    pub fn execute(command: Command) -> (Self, oneshot::Receiver<Vec<Message>>) {
        let (tx, rx) = oneshot::channel();
        (
            ScopeRequest::Execute {
                command,
                response: tx,
            },
            rx,
        )
    }

    pub fn snapshot() -> (Self, oneshot::Receiver<InstrumentConfig>) {
        let (tx, rx) = oneshot::channel();
        (ScopeRequest::Snapshot { response: tx }, rx)
    }
}

/// Cloneable sender side of the instrument actor.
#[derive(Clone, Debug)]
pub struct ScopeHandle {
    sender: mpsc::Sender<ScopeRequest>,
}

impl ScopeHandle {
    /// Execute `command` on the instrument and return the response messages.
    pub async fn execute(&self, command: Command) -> ScopeResult<Vec<Message>> {
        let (request, rx) = ScopeRequest::execute(command);
        self.sender
            .send(request)
            .await
            .map_err(|_| ScopeError::InstrumentUnavailable)?;
        rx.await.map_err(|_| ScopeError::InstrumentUnavailable)
    }

    /// Current authoritative configuration.
    pub async fn config(&self) -> ScopeResult<InstrumentConfig> {
        let (request, rx) = ScopeRequest::snapshot();
        self.sender
            .send(request)
            .await
            .map_err(|_| ScopeError::InstrumentUnavailable)?;
        rx.await.map_err(|_| ScopeError::InstrumentUnavailable)
    }
}

/// Owns the oscilloscope and the configuration it last reported.
pub struct ScopeActor<S> {
    scope: S,
    config: InstrumentConfig,
    acquisition: Acquisition,
    receiver: mpsc::Receiver<ScopeRequest>,
}

impl<S> ScopeActor<S>
where
    S: Oscilloscope + 'static,
{
    /// Spawn the actor on the current runtime.
    ///
    /// The task ends once every [`ScopeHandle`] has been dropped.
    pub fn spawn(
        scope: S,
        settings: AcquisitionSettings,
        capacity: usize,
    ) -> (ScopeHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let actor = Self {
            scope,
            config: InstrumentConfig::default(),
            acquisition: Acquisition::new(settings),
            receiver,
        };
        let task = tokio::spawn(actor.run());
        (ScopeHandle { sender }, task)
    }

    async fn run(mut self) {
        info!("Instrument actor started");
        while let Some(request) = self.receiver.recv().await {
            match request {
                ScopeRequest::Execute { command, response } => {
                    let messages = self.execute(command).await;
                    if response.send(messages).is_err() {
                        debug!("Requester dropped before the response was ready");
                    }
                }
                ScopeRequest::Snapshot { response } => {
                    let _ = response.send(self.config.clone());
                }
            }
        }
        info!("Instrument actor stopped");
    }

    /// Turn an instrument result into a response. On success `apply` stores the
    /// echoed value; on failure the config is left as it was.
    fn settle<T>(
        &mut self,
        result: anyhow::Result<T>,
        failure: &str,
        apply: impl FnOnce(&mut InstrumentConfig, T) -> Message,
    ) -> Vec<Message> {
        match result {
            Ok(value) => vec![apply(&mut self.config, value)],
            Err(e) => {
                warn!(error = %e, "{}", failure);
                vec![Message::error(failure)]
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Vec<Message> {
        debug!(command = %command, "Executing command");
        match command {
            Command::ChangeTimeScale(scale) => {
                let result = self.scope.set_time_scale(scale).await;
                self.settle(result, "Could not change time scale", |config, applied| {
                    config.time_scale = applied;
                    Message::info(InfoField::TimeScale, applied)
                })
            }
            Command::ChangeTimeOffset(offset) => {
                let result = self.scope.set_time_offset(offset).await;
                self.settle(result, "Could not change time offset", |config, applied| {
                    config.horizontal_offset = applied;
                    Message::info(InfoField::HorizontalOffset, applied)
                })
            }
            Command::ChangeVerticalScale(channel, scale) => {
                let result = self.scope.set_vertical_scale(channel, scale).await;
                self.settle(result, "Could not change vertical scale", |config, applied| {
                    config.set_vertical_scale(channel, applied);
                    Message::info(InfoField::VerticalScale(channel), applied)
                })
            }
            Command::ChangeSamplesPerRead(samples) => {
                let result = self.scope.set_samples_per_read(samples).await;
                self.settle(result, "Could not change samples per read", |config, applied| {
                    config.samples = applied;
                    Message::info(InfoField::Samples, applied)
                })
            }
            Command::ChangeSamplingRate(rate) => {
                let result = self.scope.set_sampling_rate(rate).await;
                self.settle(result, "Could not change sampling rate", |config, applied| {
                    config.sampling_rate = applied;
                    Message::info(InfoField::SamplingRate, applied)
                })
            }
            Command::AutoSetup => {
                let result = self.scope.auto_setup().await;
                self.settle(result, "Could not do auto setup", |_, ()| {
                    Message::notice("Auto Setup Done")
                })
            }
            Command::Exit => {
                let result = self.scope.shutdown().await;
                self.settle(result, "Could not exit", |_, ()| Message::notice("Exit done"))
            }
            Command::SetTriggerSource(channel) => {
                let result = self.scope.set_trigger_source(channel).await;
                self.settle(result, "Could not change trigger source", |config, applied| {
                    config.trigger_source = applied;
                    Message::info(InfoField::TriggerSource, applied)
                })
            }
            Command::SetTriggerLevel(level) => {
                let result = self.scope.set_trigger_level(level).await;
                self.settle(result, "Could not change trigger level", |config, applied| {
                    config.trigger_level = applied;
                    Message::info(InfoField::TriggerLevel, applied)
                })
            }
            Command::SetTriggerCoupling(coupling) => {
                let result = self.scope.set_trigger_coupling(coupling).await;
                self.settle(result, "Could not change trigger coupling", |config, applied| {
                    config.trigger_coupling = applied;
                    Message::info(InfoField::TriggerCoupling, applied)
                })
            }
            Command::SetTriggerSlope(slope) => {
                let result = self.scope.set_trigger_slope(slope).await;
                self.settle(result, "Could not change trigger slope", |config, applied| {
                    config.trigger_slope = applied;
                    Message::info(InfoField::TriggerSlope, applied)
                })
            }
            Command::ChangeTriggerMode(mode) => {
                let result = self.scope.set_trigger_mode(mode).await;
                self.settle(result, "Could not change trigger mode", |config, applied| {
                    config.trigger_mode = applied;
                    Message::info(InfoField::TriggerMode, applied)
                })
            }
            Command::ReadOnce(channel) => {
                let result = self
                    .acquisition
                    .read_once(&mut self.scope, &mut self.config, channel)
                    .await;
                self.settle(result, &format!("Could not read {}", channel), |_, capture| {
                    Message::Data(capture)
                })
            }
            Command::ReadTrigger => self.read_trigger().await,
        }
    }

    /// Triggered read. A trigger mode that ends up different from where it
    /// started is acknowledged so the client mirror follows the instrument.
    async fn read_trigger(&mut self) -> Vec<Message> {
        let mode_before = self.config.trigger_mode;
        let result = self
            .acquisition
            .read_around_trigger(&mut self.scope, &mut self.config)
            .await;

        let mut messages = Vec::with_capacity(4);
        if self.config.trigger_mode != mode_before {
            messages.push(Message::info(InfoField::TriggerMode, self.config.trigger_mode));
        }

        match result {
            Ok(outcome) => {
                if outcome.is_timed_out() {
                    let secs = self.acquisition.settings().trigger_timeout.as_secs_f64();
                    messages.push(Message::notice(format!("Trigger timed out after {} s", secs)));
                }
                let (ch1, ch2) = outcome.into_pair();
                messages.push(Message::Data(ch1));
                messages.push(Message::Data(ch2));
            }
            Err(e) => {
                warn!(error = %e, "Could not read around trigger");
                messages.push(Message::error("Could not read around trigger"));
            }
        }

        messages
    }
}
