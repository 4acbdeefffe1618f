//! Client side of a session.
//!
//! A [`ClientSession`] owns the write half of the connection and an inbound
//! task that decodes every response frame. The inbound task is the only writer
//! of the configuration mirror; readers get whole [`MirrorSnapshot`]s through a
//! `watch` channel and never observe a half-applied update.
//!
//! Sending is fire-and-forget: responses arrive on the event receiver returned
//! by [`ClientSession::connect`], in the order the server sent them.

use crate::data::RunLog;
use crate::error::{ScopeError, ScopeResult};
use crate::instrument::{Channel, InstrumentConfig, WaveformCapture};
use crate::network::codec::{read_frame, write_frame};
use crate::network::protocol::{Command, Message};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client-side view of the instrument, as last acknowledged by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSnapshot {
    pub config: InstrumentConfig,
    pub ch1_data: WaveformCapture,
    pub ch2_data: WaveformCapture,
}

impl Default for MirrorSnapshot {
    fn default() -> Self {
        Self {
            config: InstrumentConfig::default(),
            ch1_data: WaveformCapture::empty(Channel::C1),
            ch2_data: WaveformCapture::empty(Channel::C2),
        }
    }
}

impl MirrorSnapshot {
    /// Last measurement received for `channel`.
    pub fn measurement(&self, channel: Channel) -> &WaveformCapture {
        match channel {
            Channel::C1 => &self.ch1_data,
            Channel::C2 => &self.ch2_data,
        }
    }
}

/// Something the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An `[INFO]` response, rendered as received.
    Info(String),
    /// An `[ERROR]` response's message.
    Error(String),
    Data(WaveformCapture),
    /// A frame that is not a recognised response.
    InvalidMessage(String),
    /// The inbound loop ended. `None` on a clean close by the server.
    Closed(Option<String>),
}

pub struct ClientSession {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    mirror: watch::Receiver<MirrorSnapshot>,
    run_log: RunLog,
    inbound: JoinHandle<()>,
}

impl ClientSession {
    /// Connect and start the inbound loop.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        run_log: RunLog,
        max_frame_bytes: usize,
    ) -> ScopeResult<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        info!(%peer, "Connected to server");

        let (reader, writer) = stream.into_split();
        let (mirror_tx, mirror) = watch::channel(MirrorSnapshot::default());
        let (events_tx, events) = mpsc::unbounded_channel();

        let inbound = tokio::spawn(inbound_loop(
            reader,
            max_frame_bytes,
            mirror_tx,
            events_tx,
            run_log.clone(),
        ));

        Ok((
            Self {
                peer,
                writer: Mutex::new(writer),
                mirror,
                run_log,
                inbound,
            },
            events,
        ))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one command line. Logged to the audit file before it goes out.
    ///
    /// Fails with [`ScopeError::SessionClosed`] once the server has gone away.
    pub async fn send_command(&self, text: &str) -> ScopeResult<()> {
        if self.inbound.is_finished() {
            return Err(ScopeError::SessionClosed);
        }
        let text = text.trim();
        self.run_log.append_audit(text);
        debug!(command = %text, "Sending command");

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, text).await
    }

    pub async fn send(&self, command: &Command) -> ScopeResult<()> {
        self.send_command(&command.to_string()).await
    }

    /// Current mirror snapshot.
    pub fn mirror(&self) -> MirrorSnapshot {
        self.mirror.borrow().clone()
    }

    pub fn config(&self) -> InstrumentConfig {
        self.mirror.borrow().config.clone()
    }

    /// Receiver notified on every mirror update.
    pub fn subscribe(&self) -> watch::Receiver<MirrorSnapshot> {
        self.mirror.clone()
    }

    /// Resolve once the inbound loop has ended.
    pub async fn closed(&self) {
        let mut mirror = self.mirror.clone();
        while mirror.changed().await.is_ok() {}
    }

    /// Close our side of the connection. Responses already in flight are
    /// still delivered until the server closes its side.
    pub async fn shutdown(&self) -> ScopeResult<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

async fn inbound_loop(
    mut reader: OwnedReadHalf,
    max_frame_bytes: usize,
    mirror: watch::Sender<MirrorSnapshot>,
    events: mpsc::UnboundedSender<SessionEvent>,
    run_log: RunLog,
) {
    let reason = loop {
        let text = match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(text)) => text,
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        };
        let event = handle_response(&text, &mirror, &run_log);
        // The caller may have stopped listening; the mirror is still kept current.
        let _ = events.send(event);
    };

    match &reason {
        Some(e) => warn!(error = %e, "Connection to server lost"),
        None => info!("Server closed the connection"),
    }
    let _ = events.send(SessionEvent::Closed(reason));
}

fn handle_response(
    text: &str,
    mirror: &watch::Sender<MirrorSnapshot>,
    run_log: &RunLog,
) -> SessionEvent {
    match Message::parse_response(text) {
        Ok(Message::Data(capture)) => {
            let payload = text.split_once("]:").map_or("", |(_, payload)| payload);
            run_log.append_measurement(capture.channel, payload);
            debug!(channel = %capture.channel, samples = capture.samples.len(), "Measurement received");

            let mut next = mirror.borrow().clone();
            match capture.channel {
                Channel::C1 => next.ch1_data = capture.clone(),
                Channel::C2 => next.ch2_data = capture.clone(),
            }
            mirror.send_replace(next);
            SessionEvent::Data(capture)
        }
        Ok(Message::Error(message)) => SessionEvent::Error(message),
        Ok(info @ Message::Info { .. }) => {
            if let Message::Info {
                field: Some(field),
                value,
            } = &info
            {
                let mut next = mirror.borrow().clone();
                match field.apply(&mut next.config, value) {
                    Ok(()) => {
                        mirror.send_replace(next);
                    }
                    Err(e) => warn!(error = %e, "Mirror not updated"),
                }
            }
            SessionEvent::Info(info.to_string())
        }
        Err(_) => {
            warn!(frame = %text, "Invalid return message");
            SessionEvent::InvalidMessage(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{TriggerMode, TriggerSlope};
    use crate::network::codec::DEFAULT_MAX_FRAME_BYTES;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Server stub that writes `frames` to the first client and hangs up.
    async fn scripted_server(frames: Vec<&'static str>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let received = read_frame(&mut socket, DEFAULT_MAX_FRAME_BYTES)
                .await
                .unwrap()
                .into_iter()
                .collect();
            for frame in frames {
                write_frame(&mut socket, frame).await.unwrap();
            }
            received
        });
        (addr, task)
    }

    async fn collect(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut all = Vec::new();
        while let Some(event) = events.recv().await {
            all.push(event);
        }
        all
    }

    #[tokio::test]
    async fn test_info_updates_mirror_and_data_is_logged() {
        let (addr, server) = scripted_server(vec![
            "[INFO][C1-Vertical Scale]:2.5",
            "[INFO][Trigger Slope]:negative",
            "[INFO][Trigger Mode]:single",
            "[C-1]:0.5,0.25",
            "[ERROR]: Could not change time scale",
            "[INFO]:Auto Setup Done",
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let log = RunLog::create(dir.path()).await.unwrap();
        let (session, events) = ClientSession::connect(addr, log.clone(), DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        session.send_command("  read once:1 \n").await.unwrap();
        assert_eq!(server.await.unwrap(), vec!["read once:1".to_string()]);

        let events = collect(events).await;
        assert_eq!(events.len(), 7);
        assert_eq!(events[0], SessionEvent::Info("[INFO][C1 Vertical Scale]:2.5".into()));
        assert!(matches!(&events[3], SessionEvent::Data(c) if c.samples.len() == 2));
        assert_eq!(events[4], SessionEvent::Error("Could not change time scale".into()));
        assert_eq!(events[5], SessionEvent::Info("[INFO]:Auto Setup Done".into()));
        assert_eq!(events[6], SessionEvent::Closed(None));

        session.closed().await;
        let mirror = session.mirror();
        assert_eq!(mirror.config.c1_vertical_scale, 2.5);
        assert_eq!(mirror.config.trigger_slope, TriggerSlope::Negative);
        assert_eq!(mirror.config.trigger_mode, TriggerMode::Single);
        assert_eq!(&mirror.measurement(Channel::C1).samples[..], &[0.5, 0.25]);

        log.sync().await;
        let c1 = std::fs::read_to_string(log.channel_path(Channel::C1)).unwrap();
        assert!(c1.ends_with("\n0.5,0.25\n"));
        let audit = std::fs::read_to_string(log.audit_path()).unwrap();
        assert!(audit.trim_end().ends_with("]: read once:1"));
    }

    #[tokio::test]
    async fn test_bad_values_and_unknown_frames_leave_mirror() {
        let (addr, server) = scripted_server(vec![
            "[INFO][Time Scale]:fast",
            "hello there",
            "[C-3]:1,2",
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let log = RunLog::create(dir.path()).await.unwrap();
        let (session, events) = ClientSession::connect(addr, log, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        session.send(&Command::AutoSetup).await.unwrap();
        server.await.unwrap();

        let events = collect(events).await;
        assert_eq!(events[0], SessionEvent::Info("[INFO][Time Scale]:fast".into()));
        assert_eq!(events[1], SessionEvent::InvalidMessage("hello there".into()));
        assert_eq!(events[2], SessionEvent::InvalidMessage("[C-3]:1,2".into()));
        assert_eq!(session.mirror(), MirrorSnapshot::default());
    }

    #[tokio::test]
    async fn test_corrupt_frame_closes_with_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[0, 0, 0, 2, 0xde, 0xad]).await.unwrap();
        });

        let dir = TempDir::new().unwrap();
        let log = RunLog::create(dir.path()).await.unwrap();
        let (session, events) = ClientSession::connect(addr, log, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        let events = collect(events).await;
        assert!(matches!(events.as_slice(), [SessionEvent::Closed(Some(_))]));
        session.closed().await;
        while !session.inbound.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            session.send_command("auto setup").await,
            Err(ScopeError::SessionClosed)
        ));
    }
}
