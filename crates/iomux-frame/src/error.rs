/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame was shorter than the connection identifier.
    #[error("short frame ({len} bytes, identifier needs 16)")]
    ShortFrame { len: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached EOF.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether the reader can keep going after this error.
    ///
    /// Only a short frame is recoverable: the malformed bytes have already
    /// been consumed and the next read starts a fresh frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::ShortFrame { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
