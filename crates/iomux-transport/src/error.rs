use std::path::PathBuf;

/// Errors raised while opening a physical stream.
///
/// Once a stream is open, its I/O errors belong to the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// `sockaddr_un` cannot hold the path.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The child was spawned without piped stdin/stdout.
    #[error("child process has no piped {0}")]
    NotPiped(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
