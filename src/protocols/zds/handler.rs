//! Connection handler: drives one session from hello to close.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::messages::WorkloadResponse;
use super::session::Session;
use super::source::{RequestSource, SessionContext};
use crate::error::ProtocolError;

/// Deadlines applied to each phase. Every request gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub handshake: Duration,
    pub request: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            request: Duration::from_secs(5),
        }
    }
}

/// The protocol phase a session failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Request,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Handshake => f.write_str("handshake"),
            Phase::Request => f.write_str("request"),
        }
    }
}

/// Outcome of a session that ran to completion.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: u64,
    pub version: String,
    pub responses: Vec<WorkloadResponse>,
}

/// A failure scoped to one session.
#[derive(Debug, Error)]
#[error("session {session_id} failed during {phase}: {source}")]
pub struct SessionError {
    pub session_id: u64,
    pub phase: Phase,
    pub source: ProtocolError,
}

/// Run the handshake, then exchange every request the source yields.
///
/// The session is closed on every exit path. Errors are logged here and
/// returned; they never reach beyond this session.
pub async fn handle_connection<S, R>(
    mut session: Session<S>,
    mut source: R,
    deadlines: Deadlines,
) -> Result<SessionReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: RequestSource,
{
    info!(session = session.id(), "Peer connected");

    let result = drive(&mut session, &mut source, deadlines).await;
    session.close().await;

    match &result {
        Ok(report) => info!(
            session = report.session_id,
            requests = report.responses.len(),
            "Session complete"
        ),
        Err(e) => warn!(
            session = e.session_id,
            phase = %e.phase,
            error = %e.source,
            "Session error"
        ),
    }

    result
}

async fn drive<S, R>(
    session: &mut Session<S>,
    source: &mut R,
    deadlines: Deadlines,
) -> Result<SessionReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: RequestSource,
{
    let session_id = session.id();
    let fail = |phase: Phase| move |source: ProtocolError| SessionError {
        session_id,
        phase,
        source,
    };

    let hello = session
        .perform_handshake(deadlines.handshake)
        .await
        .map_err(fail(Phase::Handshake))?;
    info!(session = session_id, version = %hello.version, "Handshake complete");

    let mut ctx = SessionContext {
        session_id,
        version: hello.version,
        completed: 0,
    };
    let mut responses = Vec::new();

    while let Some(request) = source.next_request(&ctx) {
        let response = session
            .send_request_and_await_ack(&request, deadlines.request)
            .await
            .map_err(fail(Phase::Request))?;

        match response.error_message() {
            None => info!(
                session = session_id,
                kind = request.kind(),
                uid = request.uid().unwrap_or_default(),
                "Response received: ack"
            ),
            Some(message) => warn!(
                session = session_id,
                kind = request.kind(),
                uid = request.uid().unwrap_or_default(),
                error = message,
                "Response received: peer rejected request"
            ),
        }

        responses.push(response);
        ctx.completed += 1;
    }

    Ok(SessionReport {
        session_id,
        version: ctx.version,
        responses,
    })
}
