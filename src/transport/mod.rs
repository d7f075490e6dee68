//! Transport layer: the pipe endpoint and frame I/O over its connections.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)

pub mod frame;
mod framed;
mod pipe;

pub use frame::{FrameFormat, DEFAULT_MAX_FRAME_SIZE};
pub use framed::FramedTransport;
pub use pipe::{default_pipe_path, PipeListener, PipeOptions, PipeStream};
