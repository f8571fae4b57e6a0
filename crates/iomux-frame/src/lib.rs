//! Connection-identifier framing for iomux.
//!
//! Every frame on the physical stream carries:
//! - A 16-byte connection identifier (the multiplexing key)
//! - The payload, which runs to the end of the frame
//!
//! In the default datagram mode there is no length field: one physical
//! read is one frame. Carriers that coalesce writes can use the
//! length-prefixed mode instead, which adds a 4-byte little-endian length
//! in front of every frame.

pub mod codec;
pub mod error;
pub mod id;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, decode_length_prefixed, encode_frame, encode_length_prefixed, Frame,
    FrameConfig, FrameMode, DEFAULT_MAX_PAYLOAD, LENGTH_PREFIX_SIZE, MAX_DATAGRAM_PAYLOAD,
    MAX_DATAGRAM_SIZE,
};
pub use error::{FrameError, Result};
pub use id::{ConnectionId, ID_SIZE};
pub use reader::FrameReader;
pub use writer::FrameWriter;
