use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::id::{ConnectionId, ID_SIZE};

/// Length prefix size in [`FrameMode::LengthPrefixed`].
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest datagram frame: the size of one demux read.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Largest payload that fits in one datagram frame.
pub const MAX_DATAGRAM_PAYLOAD: usize = MAX_DATAGRAM_SIZE - ID_SIZE;

/// Default maximum payload size for length-prefixed frames: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// How frames are delimited on the physical stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameMode {
    /// `[id][payload]`, one physical read/write per frame.
    ///
    /// Requires a carrier that never merges or splits writes, such as the
    /// in-memory pipe from `iomux-transport`.
    #[default]
    Datagram,
    /// `[len: u32 LE][id][payload]` with `len = 16 + payload.len()`.
    ///
    /// Safe over byte streams that coalesce writes (sockets, OS pipes).
    LengthPrefixed,
}

/// A frame addressed to one virtual connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The connection this frame belongs to.
    pub id: ConnectionId,
    /// The payload; empty for handshake frames.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(id: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// A zero-payload frame: handshake request or acknowledgement.
    pub fn handshake(id: ConnectionId) -> Self {
        Self {
            id,
            payload: Bytes::new(),
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.payload.is_empty()
    }

    /// The wire size of this frame in the given mode.
    pub fn wire_size(&self, mode: FrameMode) -> usize {
        match mode {
            FrameMode::Datagram => ID_SIZE + self.payload.len(),
            FrameMode::LengthPrefixed => LENGTH_PREFIX_SIZE + ID_SIZE + self.payload.len(),
        }
    }
}

/// Encode a datagram frame.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬──────────────────────┐
/// │ Connection ID (16B)  │ Payload (0..N bytes) │
/// └──────────────────────┴──────────────────────┘
/// ```
pub fn encode_frame(id: &ConnectionId, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(ID_SIZE + payload.len());
    dst.put_slice(id.as_bytes());
    dst.put_slice(payload);
}

/// Decode one datagram frame from the bytes of one physical read.
///
/// Everything after the identifier is payload.
pub fn decode_frame(mut chunk: Bytes) -> Result<Frame> {
    let id = ConnectionId::from_prefix(&chunk).ok_or(FrameError::ShortFrame { len: chunk.len() })?;
    chunk.advance(ID_SIZE);
    Ok(Frame { id, payload: chunk })
}

/// Encode a length-prefixed frame.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────────────┬──────────────────────┐
/// │ Len (4B LE)│ Connection ID (16B)  │ Payload (Len-16 B)   │
/// └────────────┴──────────────────────┴──────────────────────┘
/// ```
pub fn encode_length_prefixed(id: &ConnectionId, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let max = u32::MAX as usize - ID_SIZE;
    if payload.len() > max {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + ID_SIZE + payload.len());
    dst.put_u32_le((ID_SIZE + payload.len()) as u32);
    encode_frame(id, payload, dst);
    Ok(())
}

/// Decode a length-prefixed frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// A frame whose declared length is shorter than the identifier is consumed
/// and reported as [`FrameError::ShortFrame`], so decoding can continue with
/// the next frame.
pub fn decode_length_prefixed(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    let payload_len = frame_len.saturating_sub(ID_SIZE);
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = LENGTH_PREFIX_SIZE + frame_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let body = src.split_to(frame_len).freeze();
    decode_frame(body).map(Some)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Frame delimiting mode. Default: datagram.
    pub mode: FrameMode,
    /// Maximum payload size in bytes for one frame. Default: 16 MiB,
    /// further capped to [`MAX_DATAGRAM_PAYLOAD`] in datagram mode.
    pub max_payload_size: usize,
}

impl FrameConfig {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Largest payload one frame may carry under this configuration.
    pub fn max_frame_payload(&self) -> usize {
        match self.mode {
            FrameMode::Datagram => self.max_payload_size.min(MAX_DATAGRAM_PAYLOAD),
            FrameMode::LengthPrefixed => self.max_payload_size,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            mode: FrameMode::Datagram,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
