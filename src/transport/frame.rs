//! Frame formats.
//!
//! Two ways of finding message boundaries on the pipe:
//!
//! ```text
//! length-prefixed:  +---------------------+-----------------+
//!                   | Length (4 bytes, BE)| Payload         |
//!                   +---------------------+-----------------+
//!
//! message:          one peer write == one message, read with a single call
//! ```
//!
//! `message` is the default and is what node agents speak: one raw protobuf
//! per write, which message-mode pipes deliver whole. `length-prefixed` is
//! opt-in and survives split and coalesced writes on byte-stream endpoints.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;

use crate::error::{ProtocolError, Result};

/// Size of the big-endian length header.
pub const HEADER_LEN: usize = 4;

/// Default maximum payload size, matching the pipe buffer capacity.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// How message boundaries are carried on the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FrameFormat {
    /// No prefix; a single read returns one whole message.
    #[default]
    Message,
    /// 4-byte big-endian length prefix before every payload.
    LengthPrefixed,
}

/// Wrap a payload for the wire.
pub fn encode_frame(format: FrameFormat, payload: &[u8]) -> Bytes {
    match format {
        FrameFormat::Message => Bytes::copy_from_slice(payload),
        FrameFormat::LengthPrefixed => {
            let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
            frame.put_u32(payload.len() as u32);
            frame.extend_from_slice(payload);
            frame.freeze()
        }
    }
}

/// Try to split one length-prefixed frame off the front of `buffer`.
///
/// Returns `Ok(None)` until the header and the whole payload are buffered.
/// Bytes belonging to later frames are left in place.
pub fn decode_length_prefixed(buffer: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    if buffer.len() < HEADER_LEN {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buffer[..HEADER_LEN]);
    let length = u32::from_be_bytes(header) as usize;

    if length > max_frame_size {
        return Err(ProtocolError::OversizedFrame {
            size: length,
            max: max_frame_size,
        });
    }

    if buffer.len() < HEADER_LEN + length {
        buffer.reserve(HEADER_LEN + length - buffer.len());
        return Ok(None);
    }

    buffer.advance(HEADER_LEN);
    Ok(Some(buffer.split_to(length).freeze()))
}
