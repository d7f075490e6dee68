//! Payload codec.
//!
//! Interprets exactly one complete payload; framing happens in the transport.
//! Protobuf is not self-describing, so the caller names the kind of message it
//! expects and the codec validates the decoded value against that kind.
//!
//! Validation is stricter than protobuf itself: a request or response must
//! carry a payload variant, and a hello must carry a non-empty version. An
//! empty payload decodes to an all-default hello, so without the version
//! check any zero-length read would pass as a handshake.

use bytes::Bytes;
use prost::Message;

use super::messages::{HelloMessage, WorkloadRequest, WorkloadResponse};
use crate::error::{ProtocolError, Result};

/// Discriminator selecting how a payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    WorkloadRequest,
    WorkloadResponse,
}

/// Any message that can travel on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Hello(HelloMessage),
    Request(WorkloadRequest),
    Response(WorkloadResponse),
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Hello(_) => MessageKind::Hello,
            ProtocolMessage::Request(_) => MessageKind::WorkloadRequest,
            ProtocolMessage::Response(_) => MessageKind::WorkloadResponse,
        }
    }

    pub fn into_hello(self) -> Result<HelloMessage> {
        match self {
            ProtocolMessage::Hello(hello) => Ok(hello),
            other => Err(unexpected(MessageKind::Hello, other.kind())),
        }
    }

    pub fn into_response(self) -> Result<WorkloadResponse> {
        match self {
            ProtocolMessage::Response(response) => Ok(response),
            other => Err(unexpected(MessageKind::WorkloadResponse, other.kind())),
        }
    }
}

fn unexpected(expected: MessageKind, got: MessageKind) -> ProtocolError {
    ProtocolError::Decode(format!("expected {expected:?} message, got {got:?}"))
}

/// Serialize a message into a single payload.
///
/// Requests and responses without a payload variant are rejected.
pub fn encode(message: &ProtocolMessage) -> Result<Bytes> {
    let bytes = match message {
        ProtocolMessage::Hello(hello) => hello.encode_to_vec(),
        ProtocolMessage::Request(request) => {
            if request.payload.is_none() {
                return Err(ProtocolError::Encode(
                    "workload request has no payload set".to_string(),
                ));
            }
            request.encode_to_vec()
        }
        ProtocolMessage::Response(response) => {
            if response.payload.is_none() {
                return Err(ProtocolError::Encode(
                    "workload response has no payload set".to_string(),
                ));
            }
            response.encode_to_vec()
        }
    };
    Ok(Bytes::from(bytes))
}

/// Deserialize one payload as the given kind of message.
pub fn decode(bytes: &[u8], kind: MessageKind) -> Result<ProtocolMessage> {
    match kind {
        MessageKind::Hello => {
            let hello = HelloMessage::decode(bytes)?;
            // An empty payload decodes to a default hello; nothing identified it.
            if hello.version.is_empty() {
                return Err(ProtocolError::Decode(
                    "hello message carries no version".to_string(),
                ));
            }
            Ok(ProtocolMessage::Hello(hello))
        }
        MessageKind::WorkloadRequest => {
            let request = WorkloadRequest::decode(bytes)?;
            if request.payload.is_none() {
                return Err(ProtocolError::Decode(
                    "workload request has no payload set".to_string(),
                ));
            }
            Ok(ProtocolMessage::Request(request))
        }
        MessageKind::WorkloadResponse => {
            let response = WorkloadResponse::decode(bytes)?;
            if response.payload.is_none() {
                return Err(ProtocolError::Decode(
                    "workload response has no payload set".to_string(),
                ));
            }
            Ok(ProtocolMessage::Response(response))
        }
    }
}
