use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{
    decode_frame, decode_length_prefixed, Frame, FrameConfig, FrameMode, MAX_DATAGRAM_SIZE,
};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads frames from the read half of a physical stream.
///
/// In datagram mode every call performs exactly one read and decodes it as
/// one frame. In length-prefixed mode partial reads are buffered and only
/// complete frames are returned.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// `Err(FrameError::ShortFrame)` for a frame too short to carry an
    /// identifier; the reader stays usable after the latter.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.config.mode {
            FrameMode::Datagram => self.read_datagram().await,
            FrameMode::LengthPrefixed => self.read_length_prefixed().await,
        }
    }

    async fn read_datagram(&mut self) -> Result<Frame> {
        self.buf.clear();
        self.buf.reserve(MAX_DATAGRAM_SIZE);
        let read = loop {
            match self.inner.read_buf(&mut self.buf).await {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        };

        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }

        decode_frame(self.buf.split().freeze())
    }

    async fn read_length_prefixed(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) =
                decode_length_prefixed(&mut self.buf, self.config.max_payload_size)?
            {
                return Ok(frame);
            }

            self.buf.reserve(INITIAL_BUFFER_CAPACITY);
            let read = match self.inner.read_buf(&mut self.buf).await {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
