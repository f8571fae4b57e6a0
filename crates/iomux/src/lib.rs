//! Multiplex ordered, bidirectional virtual connections over one duplex
//! byte stream.
//!
//! Both peers of a stream (an in-memory pipe, a child's stdin/stdout, a
//! Unix socket) wrap it in a [`conn::MuxStream`]. One side dials, the
//! other listens and accepts; every accepted connection reads and writes
//! independently of the others.
//!
//! # Crate Structure
//!
//! - [`transport`]: Physical stream helpers (message pipe, stdio, UDS)
//! - [`frame`]: Identifier framing, datagram and length-prefixed
//! - [`conn`]: Stream handle, virtual connections, dial and listen
//!
//! ```no_run
//! use iomux::conn::{dial, listen, DialOptions, MuxStream};
//! use iomux::transport::pipe;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> iomux::conn::Result<()> {
//! let scope = CancellationToken::new();
//! let (left, right) = pipe();
//! let listener = listen(&scope, MuxStream::new(right)).await?;
//! let conn = dial(&scope, &MuxStream::new(left), DialOptions::default()).await?;
//! conn.write(b"hello").await?;
//!
//! let accepted = listener.accept().await?;
//! let mut buf = [0u8; 5];
//! let n = accepted.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use iomux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use iomux_frame::*;
}

/// Re-export connection types.
pub mod conn {
    pub use iomux_conn::*;
}
