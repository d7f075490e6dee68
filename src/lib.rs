//! # zds-pipe
//!
//! Server side of the workload registration protocol spoken with a node
//! agent over a local named pipe.
//!
//! ## Architecture
//!
//! - **Transport**: pipe listener plus deadline-bounded frame I/O
//! - **Protocol**: protobuf messages, handshake and request/ack exchange
//! - **Server**: accept loop dispatching each connection to its own task

pub mod config;
pub mod error;
pub mod protocols;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::ProtocolError;
pub use server::Server;
