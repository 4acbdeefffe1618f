//! Server side of a session.
//!
//! [`DispatchServer`] accepts one client and answers its frames in order:
//! each command is parsed, executed on the scope actor, and every response is
//! written back before the next frame is read. Responses that would not fit in
//! a frame of `max_frame_bytes` are replaced by an `[ERROR]` reply.

use crate::actors::ScopeHandle;
use crate::error::ScopeResult;
use crate::network::codec::{read_frame, write_frame};
use crate::network::protocol::{Command, Message};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const RESPONSE_TOO_LARGE: &str = "Response exceeds the frame limit";

/// What happened during one served session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub peer: SocketAddr,
    /// Frames received and answered.
    pub commands: usize,
    /// Of those, how many were answered with at least one `[ERROR]`.
    pub errors: usize,
}

/// Server side of a session: one client, one sequential dispatch loop.
pub struct DispatchServer {
    listener: TcpListener,
    scope: ScopeHandle,
    max_frame_bytes: usize,
}

impl DispatchServer {
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        scope: ScopeHandle,
        max_frame_bytes: usize,
    ) -> ScopeResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Dispatch server listening");

        Ok(Self {
            listener,
            scope,
            max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> ScopeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept a single client and serve it until it disconnects.
    ///
    /// Command and instrument faults are answered with `[ERROR]` frames and do
    /// not end the session. Transport and codec faults do, and are returned.
    pub async fn serve(self) -> ScopeResult<SessionSummary> {
        let (socket, peer) = self.listener.accept().await?;
        info!(%peer, "Client connected");

        let mut summary = SessionSummary {
            peer,
            commands: 0,
            errors: 0,
        };
        let result = self.handle_client(socket, &mut summary).await;

        match &result {
            Ok(()) => info!(
                %peer,
                commands = summary.commands,
                errors = summary.errors,
                "Client disconnected"
            ),
            Err(e) => error!(%peer, error = %e, "Session ended with error"),
        }
        result.map(|()| summary)
    }

    async fn handle_client(
        &self,
        mut socket: TcpStream,
        summary: &mut SessionSummary,
    ) -> ScopeResult<()> {
        while let Some(text) = read_frame(&mut socket, self.max_frame_bytes).await? {
            debug!(peer = %summary.peer, command = %text, "Received frame");
            let responses = self.process_request(&text).await?;
            let responses: Vec<Message> = responses
                .into_iter()
                .map(|response| self.fit_frame(response))
                .collect();

            summary.commands += 1;
            if responses.iter().any(Message::is_error) {
                summary.errors += 1;
            }

            for response in &responses {
                write_frame(&mut socket, &response.to_string()).await?;
            }
        }
        Ok(())
    }

    /// Replace a response the peer could not accept in one frame.
    fn fit_frame(&self, response: Message) -> Message {
        let len = response.to_string().len();
        if len <= self.max_frame_bytes {
            return response;
        }
        warn!(len, max = self.max_frame_bytes, "Response exceeds frame limit");
        Message::error(RESPONSE_TOO_LARGE)
    }

    async fn process_request(&self, text: &str) -> ScopeResult<Vec<Message>> {
        match text.parse::<Command>() {
            Ok(command) => self.scope.execute(command).await,
            Err(e) => {
                warn!(command = %text.trim(), error = %e, "Rejected command");
                Ok(vec![Message::error(e.to_string())])
            }
        }
    }
}
