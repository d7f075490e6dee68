//! Workload registration protocol.
//!
//! A node agent connects to the pipe and announces its version:
//!
//! ```text
//! peer -> engine:  HelloMessage { version }
//! engine -> peer:  WorkloadRequest { add | keep | remove }
//! peer -> engine:  WorkloadResponse { ack | error }
//!                  ... one request in flight at a time ...
//! ```
//!
//! ## Layers
//! - `messages`: protobuf wire types
//! - `codec`: payload (de)serialization by expected message kind
//! - `session`: handshake and request/ack state machine
//! - `source`: where requests come from
//! - `handler`: drives one session end to end

pub mod codec;
pub mod handler;
pub mod messages;
pub mod session;
pub mod source;

pub use handler::{handle_connection, Deadlines, Phase, SessionError, SessionReport};
pub use messages::{HelloMessage, WorkloadInfo, WorkloadRequest, WorkloadResponse};
pub use session::{Session, SessionState};
pub use source::{RequestSource, ScriptedRequests, SessionContext};
