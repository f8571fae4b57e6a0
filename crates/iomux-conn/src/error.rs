use iomux_frame::{ConnectionId, FrameError};

/// Errors returned by streams, listeners and virtual connections.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A frame arrived for an identifier with no connection and no listener.
    #[error("unknown connection identifier {0}")]
    UnknownIdentifier(ConnectionId),

    /// The peer answered the handshake with a failure message.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The cancellation scope fired before the operation completed.
    #[error("context is done")]
    ContextCanceled,

    /// The physical stream failed or was shut down.
    #[error("stream closed: {0}")]
    StreamClosed(String),

    /// The connection or listener was closed locally.
    #[error("use of closed connection")]
    Closed,

    /// The stream already has a listener installed.
    #[error("stream already has a listener")]
    AlreadyListening,

    /// The identifier is already registered on this stream.
    #[error("connection identifier {0} already registered")]
    DuplicateIdentifier(ConnectionId),
}

impl MuxError {
    /// Whether this error ends the physical stream rather than one operation.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, MuxError::StreamClosed(_))
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
