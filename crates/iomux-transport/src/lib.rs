//! Physical stream helpers for iomux.
//!
//! iomux multiplexes virtual connections over any duplex byte stream that
//! implements `AsyncRead + AsyncWrite`. This crate provides the carriers
//! the rest of the workspace and its tests use:
//! - [`pipe`]: an in-memory duplex pipe that preserves write boundaries
//! - [`join`] / [`stdio`]: a duplex stream assembled from a reader and a
//!   writer (process stdin/stdout)
//! - [`spawn`]: a child process whose stdout/stdin form the stream
//! - [`UnixDomainSocket`]: bind/accept/connect over filesystem-path UDS

pub mod child;
pub mod error;
pub mod join;
pub mod pipe;

#[cfg(unix)]
pub mod uds;

pub use child::{spawn, take_stdio, ChildStream};
pub use error::{Result, TransportError};
pub use join::{join, stdio, Joined, StdioStream};
pub use pipe::{pipe, PipeEnd};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
