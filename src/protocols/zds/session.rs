//! Protocol exchange on one session.
//!
//! ```text
//! AwaitingHello --perform_handshake--> Ready --close--> Closed
//!       |                                |                ^
//!       |                                +--failed exchange+
//!       +---------------------close-----------------------+
//! ```
//!
//! Exchange is strictly half-duplex: every method takes `&mut self`, so a
//! request cannot be issued until the previous reply (or failure) is observed.
//! Once a request has gone out without its reply being read, any byte still
//! in flight could be mistaken for the answer to a later request, so a failed
//! exchange closes the session.

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::codec::{self, MessageKind, ProtocolMessage};
use super::messages::{HelloMessage, WorkloadRequest, WorkloadResponse};
use crate::error::{ProtocolError, Result};
use crate::transport::FramedTransport;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Ready,
    Closed,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::AwaitingHello => "awaiting hello",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection protocol state.
pub struct Session<S> {
    id: u64,
    transport: FramedTransport<S>,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, transport: FramedTransport<S>) -> Self {
        Self {
            id,
            transport,
            state: SessionState::AwaitingHello,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Read the peer's hello and mark the session ready.
    ///
    /// On failure the session stays in `AwaitingHello`; closing it is the
    /// caller's job.
    pub async fn perform_handshake(&mut self, timeout: Duration) -> Result<HelloMessage> {
        self.require(SessionState::AwaitingHello, "perform handshake")?;

        let payload = self.transport.read_message(timeout).await?;
        let hello = codec::decode(&payload, MessageKind::Hello)?.into_hello()?;

        self.state = SessionState::Ready;
        Ok(hello)
    }

    /// Send one request and wait for its reply.
    ///
    /// The write and the read each get the full `timeout`. An `Error` reply
    /// from the peer is a successful exchange and is returned as a value.
    ///
    /// A request that cannot be encoded never reaches the wire and leaves the
    /// session `Ready`. Any failure after that closes the session.
    pub async fn send_request_and_await_ack(
        &mut self,
        request: &WorkloadRequest,
        timeout: Duration,
    ) -> Result<WorkloadResponse> {
        self.require(SessionState::Ready, "send request")?;

        let payload = codec::encode(&ProtocolMessage::Request(request.clone()))?;
        let result = self.exchange(&payload, request.kind(), timeout).await;
        if result.is_err() {
            self.close().await;
        }
        result
    }

    /// Release the connection. Idempotent.
    pub async fn close(&mut self) {
        if !self.transport.is_closed() {
            debug!(session = self.id, state = %self.state, "Closing session");
            self.transport.close().await;
        }
        self.state = SessionState::Closed;
    }

    async fn exchange(
        &mut self,
        payload: &[u8],
        kind: &'static str,
        timeout: Duration,
    ) -> Result<WorkloadResponse> {
        let written = self.transport.write_message(payload, timeout).await?;
        debug!(session = self.id, bytes = written, kind, "Sent request");

        let reply = self.transport.read_message(timeout).await?;
        codec::decode(&reply, MessageKind::WorkloadResponse)?.into_response()
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }
}
