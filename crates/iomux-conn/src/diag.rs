//! Diagnostic sinks.
//!
//! Every stream, listener and connection reports what it does through a
//! pair of sinks: one for ordinary events, one for errors. There is no
//! process-wide logger; callers pass sinks through the options structs.

use std::fmt;
use std::sync::Arc;

use iomux_frame::{ConnectionId, FrameError};
use tracing::Level;

use crate::error::MuxError;

/// Something that happened on a stream or a virtual connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A dial registered a fresh identifier.
    Dialed { id: ConnectionId },
    /// The handshake request was written.
    HandshakeSent { id: ConnectionId },
    /// The peer acknowledged the handshake.
    Established { id: ConnectionId },
    /// The listener accepted an unknown identifier and queued it for `accept()`.
    Accepted { id: ConnectionId },
    /// The listener refused an unknown identifier.
    Rejected { id: ConnectionId, reason: String },
    /// The peer's handshake reply was a failure message.
    HandshakeFailed { id: ConnectionId, reason: String },
    /// A payload was routed to a connection's inbox.
    Received { id: ConnectionId, len: usize },
    /// A caller read bytes from a connection.
    Read { id: ConnectionId, len: usize },
    /// A caller's write was put on the stream.
    Wrote { id: ConnectionId, len: usize },
    /// A connection was closed locally.
    Closed { id: ConnectionId },
    /// A frame shorter than an identifier was discarded.
    ShortFrame { len: usize },
    /// A frame for an unknown identifier was dropped.
    Unroutable { id: ConnectionId, len: usize },
    /// A bounded inbox was full and a payload was dropped.
    InboxOverflow { id: ConnectionId, len: usize },
    /// The physical stream ended.
    StreamClosed { reason: String },
}

impl Event {
    /// Short machine-readable name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Dialed { .. } => "dialed",
            Event::HandshakeSent { .. } => "handshake_sent",
            Event::Established { .. } => "established",
            Event::Accepted { .. } => "accepted",
            Event::Rejected { .. } => "rejected",
            Event::HandshakeFailed { .. } => "handshake_failed",
            Event::Received { .. } => "received",
            Event::Read { .. } => "read",
            Event::Wrote { .. } => "wrote",
            Event::Closed { .. } => "closed",
            Event::ShortFrame { .. } => "short_frame",
            Event::Unroutable { .. } => "unroutable",
            Event::InboxOverflow { .. } => "inbox_overflow",
            Event::StreamClosed { .. } => "stream_closed",
        }
    }

    /// Whether the event belongs on the error sink.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::HandshakeFailed { .. }
                | Event::ShortFrame { .. }
                | Event::Unroutable { .. }
                | Event::InboxOverflow { .. }
                | Event::StreamClosed { .. }
        )
    }

    /// The error an error event reports.
    ///
    /// A frame for an identifier with no connection and no listener is
    /// [`MuxError::UnknownIdentifier`]. Inbox overflow is a drop, not an
    /// error of any operation, and has none.
    pub fn error(&self) -> Option<MuxError> {
        match self {
            Event::HandshakeFailed { reason, .. } => {
                Some(MuxError::HandshakeFailed(reason.clone()))
            }
            Event::ShortFrame { len } => {
                Some(MuxError::Frame(FrameError::ShortFrame { len: *len }))
            }
            Event::Unroutable { id, .. } => Some(MuxError::UnknownIdentifier(*id)),
            Event::StreamClosed { reason } => Some(MuxError::StreamClosed(reason.clone())),
            _ => None,
        }
    }

    /// The connection the event concerns, if any.
    pub fn id(&self) -> Option<ConnectionId> {
        match self {
            Event::Dialed { id }
            | Event::HandshakeSent { id }
            | Event::Established { id }
            | Event::Accepted { id }
            | Event::Rejected { id, .. }
            | Event::HandshakeFailed { id, .. }
            | Event::Received { id, .. }
            | Event::Read { id, .. }
            | Event::Wrote { id, .. }
            | Event::Closed { id }
            | Event::Unroutable { id, .. }
            | Event::InboxOverflow { id, .. } => Some(*id),
            Event::ShortFrame { .. } | Event::StreamClosed { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Dialed { id } => write!(f, "dialing {id}"),
            Event::HandshakeSent { id } => write!(f, "handshake sent for {id}"),
            Event::Established { id } => write!(f, "connection {id} established"),
            Event::Accepted { id } => write!(f, "accepted connection {id}"),
            Event::Rejected { id, reason } => write!(f, "rejected connection {id}: {reason}"),
            Event::HandshakeFailed { id, reason } => {
                write!(f, "failed to establish connection {id}: {reason}")
            }
            Event::Received { id, len } => write!(f, "routed {len}b to {id}"),
            Event::Read { id, len } => write!(f, "read {len}b from {id}"),
            Event::Wrote { id, len } => write!(f, "wrote {len}b to {id}"),
            Event::Closed { id } => write!(f, "connection {id} closed"),
            Event::ShortFrame { len } => write!(f, "read {len}b, less than header length"),
            Event::Unroutable { id, len } => {
                write!(f, "dropped {len}b for unknown connection {id}")
            }
            Event::InboxOverflow { id, len } => write!(f, "inbox of {id} full, dropped {len}b"),
            Event::StreamClosed { reason } => write!(f, "stream closed: {reason}"),
        }
    }
}

/// Receives diagnostic events. Sinks are purely observational.
pub trait Sink: Send + Sync {
    fn record(&self, event: &Event);
}

/// A sink shared between streams and connections.
pub type SharedSink = Arc<dyn Sink>;

impl<F> Sink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn record(&self, event: &Event) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn record(&self, _event: &Event) {}
}

/// Forwards events to `tracing` at a fixed level.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    level: Level,
}

impl TracingSink {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl Sink for TracingSink {
    fn record(&self, event: &Event) {
        let kind = event.kind();
        let id = event.id().map(|id| id.to_string());
        let id = id.as_deref();
        let error = event.error().map(|err| err.to_string());
        let error = error.as_deref();
        match self.level {
            Level::ERROR => tracing::error!(kind, id, error, "{event}"),
            Level::WARN => tracing::warn!(kind, id, error, "{event}"),
            Level::INFO => tracing::info!(kind, id, error, "{event}"),
            Level::DEBUG => tracing::debug!(kind, id, error, "{event}"),
            _ => tracing::trace!(kind, id, error, "{event}"),
        }
    }
}

/// An event sink and an error sink, with the routing between them.
#[derive(Clone)]
pub struct Diagnostics {
    events: SharedSink,
    errors: SharedSink,
}

impl Diagnostics {
    pub fn new(events: SharedSink, errors: SharedSink) -> Self {
        Self { events, errors }
    }

    /// Diagnostics that drop everything.
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink), Arc::new(NullSink))
    }

    pub fn events(&self) -> &SharedSink {
        &self.events
    }

    pub fn errors(&self) -> &SharedSink {
        &self.errors
    }

    /// Record `event` on the sink its kind belongs to.
    pub fn emit(&self, event: Event) {
        if event.is_error() {
            self.errors.record(&event);
        } else {
            self.events.record(&event);
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(
            Arc::new(TracingSink::new(Level::DEBUG)),
            Arc::new(TracingSink::new(Level::WARN)),
        )
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}
