//! Virtual connections multiplexed over one duplex byte stream.
//!
//! Wrap an already-open stream (an in-memory pipe, a socket, a child
//! process's stdio) in a [`MuxStream`], then:
//! - [`dial`] opens a virtual connection and waits for the peer's
//!   acknowledgement;
//! - [`listen`] installs a [`Listener`] whose `accept()` yields every
//!   connection the peer opens.
//!
//! Each [`VirtualConn`] is an ordered, bidirectional byte channel keyed by
//! a 16-byte identifier carried in front of every frame.

pub mod conn;
pub mod diag;
pub mod dial;
pub mod error;
pub mod handshake;
mod inbox;
pub mod listener;
pub mod options;
pub mod stream;
mod table;

pub use conn::{ConnAddr, OnClose, VirtualConn};
pub use diag::{Diagnostics, Event, NullSink, SharedSink, Sink, TracingSink};
pub use dial::dial;
pub use error::{MuxError, Result};
pub use handshake::{check_reply, Rejection};
pub use listener::{listen, listen_with_options, Listener, ListenerAddr};
pub use options::{DialOptions, InboxPolicy, ListenOptions, StreamConfig, DEFAULT_BACKLOG};
pub use stream::{MuxStream, PhysicalStream};
