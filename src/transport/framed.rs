//! Deadline-bounded frame I/O over one raw connection.

use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::frame::{decode_length_prefixed, encode_frame, FrameFormat};
use crate::error::{ProtocolError, Result};

/// Windows `ERROR_MORE_DATA`: a message-mode read did not fit the buffer.
#[cfg(windows)]
const ERROR_MORE_DATA: i32 = 234;

/// One connection plus the state needed to cut it into frames.
///
/// Generic over the stream so the same code runs on pipes, sockets and
/// in-memory test streams.
pub struct FramedTransport<S> {
    stream: Option<S>,
    format: FrameFormat,
    max_frame_size: usize,
    buffer: BytesMut,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, format: FrameFormat, max_frame_size: usize) -> Self {
        Self {
            stream: Some(stream),
            format,
            max_frame_size,
            buffer: BytesMut::with_capacity(max_frame_size),
        }
    }

    /// Read one complete frame payload, giving up after `timeout`.
    pub async fn read_message(&mut self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout {
                operation: "read frame",
                after: timeout,
            }),
        }
    }

    /// Write one payload as a single frame, giving up after `timeout`.
    ///
    /// Returns the number of bytes put on the wire.
    pub async fn write_message(&mut self, payload: &[u8], timeout: Duration) -> Result<usize> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let frame = encode_frame(self.format, payload);
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        let write = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            Ok::<_, io::Error>(frame.len())
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::Timeout {
                operation: "write frame",
                after: timeout,
            }),
        }
    }

    /// Shut down and release the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                trace!(error = %e, "Shutdown on close failed");
            }
        }
        self.buffer.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        match self.format {
            FrameFormat::Message => read_single(stream, self.max_frame_size).await,
            FrameFormat::LengthPrefixed => loop {
                if let Some(frame) = decode_length_prefixed(&mut self.buffer, self.max_frame_size)? {
                    return Ok(frame);
                }
                let n = stream.read_buf(&mut self.buffer).await?;
                if n == 0 {
                    return Err(peer_closed());
                }
                trace!(bytes = n, buffered = self.buffer.len(), "Read from pipe");
            },
        }
    }
}

/// One underlying read into a buffer with a spare byte past the maximum.
///
/// A read that uses the spare byte means the message did not fit.
async fn read_single<S>(stream: &mut S, max_frame_size: usize) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max_frame_size + 1];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) if is_more_data(&e) => {
            return Err(ProtocolError::OversizedFrame {
                size: max_frame_size + 1,
                max: max_frame_size,
            })
        }
        Err(e) => return Err(e.into()),
    };

    if n == 0 {
        return Err(peer_closed());
    }
    if n > max_frame_size {
        return Err(ProtocolError::OversizedFrame {
            size: n,
            max: max_frame_size,
        });
    }

    buf.truncate(n);
    Ok(Bytes::from(buf))
}

#[cfg(windows)]
fn is_more_data(e: &io::Error) -> bool {
    e.raw_os_error() == Some(ERROR_MORE_DATA)
}

#[cfg(not(windows))]
fn is_more_data(_e: &io::Error) -> bool {
    false
}

fn peer_closed() -> ProtocolError {
    ProtocolError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "peer closed the connection",
    ))
}

fn not_connected() -> ProtocolError {
    ProtocolError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "session transport is closed",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_read_split_frame() {
        let mock = Builder::new()
            .read(b"\x00\x00")
            .read(b"\x00\x05he")
            .read(b"llo")
            .build();
        let mut transport = FramedTransport::new(mock, FrameFormat::LengthPrefixed, 1024);

        let frame = transport.read_message(TIMEOUT).await.unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_coalesced_frames() {
        let mock = Builder::new()
            .read(b"\x00\x00\x00\x03one\x00\x00\x00\x03two")
            .build();
        let mut transport = FramedTransport::new(mock, FrameFormat::LengthPrefixed, 1024);

        assert_eq!(&transport.read_message(TIMEOUT).await.unwrap()[..], b"one");
        assert_eq!(&transport.read_message(TIMEOUT).await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_write_prefixes_length() {
        let mock = Builder::new().write(b"\x00\x00\x00\x03abc").build();
        let mut transport = FramedTransport::new(mock, FrameFormat::LengthPrefixed, 1024);

        let written = transport.write_message(b"abc", TIMEOUT).await.unwrap();
        assert_eq!(written, 7);
    }

    #[tokio::test]
    async fn test_message_mode_single_read() {
        let mock = Builder::new().read(b"whole message").write(b"reply").build();
        let mut transport = FramedTransport::new(mock, FrameFormat::Message, 1024);

        let frame = transport.read_message(TIMEOUT).await.unwrap();
        assert_eq!(&frame[..], b"whole message");
        assert_eq!(transport.write_message(b"reply", TIMEOUT).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_message_mode_oversized() {
        let big = vec![7u8; 17];
        let mock = Builder::new().read(&big).build();
        let mut transport = FramedTransport::new(mock, FrameFormat::Message, 16);

        match transport.read_message(TIMEOUT).await {
            Err(ProtocolError::OversizedFrame { size, max }) => {
                assert_eq!(size, 17);
                assert_eq!(max, 16);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_mode_exact_fit() {
        let exact = vec![1u8; 16];
        let mock = Builder::new().read(&exact).build();
        let mut transport = FramedTransport::new(mock, FrameFormat::Message, 16);

        assert_eq!(transport.read_message(TIMEOUT).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_write_oversized_rejected_before_io() {
        let mock = Builder::new().build();
        let mut transport = FramedTransport::new(mock, FrameFormat::LengthPrefixed, 4);

        let err = transport.write_message(b"too long", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedFrame { size: 8, max: 4 }));
    }

    #[tokio::test]
    async fn test_read_timeout_then_close() {
        let (ours, _peer) = duplex(64);
        let mut transport = FramedTransport::new(ours, FrameFormat::LengthPrefixed, 1024);

        let err = transport
            .read_message(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { .. }));

        transport.close().await;
        transport.close().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_write_timeout_when_peer_never_reads() {
        let (ours, _peer) = duplex(1);
        let mut transport = FramedTransport::new(ours, FrameFormat::Message, 1024);

        let err = transport
            .write_message(&[0u8; 16], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Timeout {
                operation: "write frame",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_peer_disconnect_is_io_error() {
        let (ours, peer) = duplex(64);
        drop(peer);
        let mut transport = FramedTransport::new(ours, FrameFormat::LengthPrefixed, 1024);

        match transport.read_message(TIMEOUT).await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_io_after_close_fails() {
        let (ours, _peer) = duplex(64);
        let mut transport = FramedTransport::new(ours, FrameFormat::Message, 1024);
        transport.close().await;

        match transport.read_message(TIMEOUT).await {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(transport.write_message(b"x", TIMEOUT).await.is_err());
    }
}
