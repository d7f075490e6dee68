//! Platform pipe endpoint.
//!
//! - Unix: Unix domain socket
//! - Windows: named pipe in message mode
//!
//! The listener only produces raw connections; it knows nothing about the
//! protocol spoken on them.

use crate::error::{ProtocolError, Result};

/// Endpoint settings applied when binding.
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// Well-known path of the endpoint.
    pub path: String,
    /// Inbound buffer capacity (Windows only).
    pub in_buffer_size: u32,
    /// Outbound buffer capacity (Windows only).
    pub out_buffer_size: u32,
    /// Create the pipe in message mode (Windows only).
    pub message_mode: bool,
    /// Permission bits applied to the socket file (Unix only).
    pub socket_mode: Option<u32>,
}

/// Default endpoint path for this platform.
pub fn default_pipe_path() -> String {
    #[cfg(windows)]
    {
        r"\\.\pipe\istio-zds".to_string()
    }

    #[cfg(not(windows))]
    {
        "/tmp/istio-zds.sock".to_string()
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::debug;

    /// Raw connection handed to a session.
    pub type PipeStream = UnixStream;

    /// Unix domain socket listener.
    pub struct PipeListener {
        listener: Option<UnixListener>,
        path: String,
    }

    impl PipeListener {
        /// Bind to the socket path, removing a stale socket file first.
        pub async fn bind(options: &PipeOptions) -> Result<Self> {
            if Path::new(&options.path).exists() {
                debug!(path = %options.path, "Removing stale socket");
                std::fs::remove_file(&options.path)?;
            }

            let listener = UnixListener::bind(&options.path)?;

            if let Some(mode) = options.socket_mode {
                std::fs::set_permissions(&options.path, std::fs::Permissions::from_mode(mode))?;
            }

            Ok(Self {
                listener: Some(listener),
                path: options.path.clone(),
            })
        }

        /// Wait for the next peer.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            let listener = self.listener.as_ref().ok_or(ProtocolError::ListenerClosed)?;
            let (stream, _addr) = listener.accept().await?;
            Ok(stream)
        }

        /// Stop accepting. Later `accept` calls fail with `ListenerClosed`.
        pub fn close(&mut self) {
            if self.listener.take().is_some() {
                let _ = std::fs::remove_file(&self.path);
            }
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            self.close();
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
    use tracing::debug;

    /// Raw connection handed to a session.
    pub type PipeStream = NamedPipeServer;

    /// Named pipe listener.
    ///
    /// Always holds one unconnected instance so a peer arriving between two
    /// `accept` calls still finds the pipe.
    pub struct PipeListener {
        pending: Option<NamedPipeServer>,
        options: PipeOptions,
    }

    impl PipeListener {
        /// Create the first pipe instance.
        pub async fn bind(options: &PipeOptions) -> Result<Self> {
            let pending = server_options(options)
                .first_pipe_instance(true)
                .create(&options.path)?;

            Ok(Self {
                pending: Some(pending),
                options: options.clone(),
            })
        }

        /// Wait for the next peer.
        ///
        /// An instance whose connect failed (a client that hung up before it
        /// was accepted) is discarded and replaced, so the next call waits on
        /// a fresh instance.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            let connected = match self.pending.as_ref() {
                Some(pending) => pending.connect().await,
                None => return Err(ProtocolError::ListenerClosed),
            };

            if let Err(e) = connected {
                debug!(path = %self.options.path, error = %e, "Replacing broken pipe instance");
                self.pending = Some(server_options(&self.options).create(&self.options.path)?);
                return Err(e.into());
            }

            let next = server_options(&self.options).create(&self.options.path)?;
            let connected = self.pending.replace(next).ok_or(ProtocolError::ListenerClosed)?;
            Ok(connected)
        }

        /// Stop accepting. Later `accept` calls fail with `ListenerClosed`.
        pub fn close(&mut self) {
            self.pending = None;
        }

        pub fn path(&self) -> &str {
            &self.options.path
        }
    }

    fn server_options(options: &PipeOptions) -> ServerOptions {
        let mode = if options.message_mode {
            PipeMode::Message
        } else {
            PipeMode::Byte
        };

        let mut server = ServerOptions::new();
        server
            .pipe_mode(mode)
            .in_buffer_size(options.in_buffer_size)
            .out_buffer_size(options.out_buffer_size)
            .reject_remote_clients(true);
        server
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};
