use std::fmt;
use std::sync::Arc;

use iomux_frame::{FrameConfig, FrameMode};
use tracing::Level;

use crate::diag::{Diagnostics, SharedSink, TracingSink};

/// Default number of accepted connections waiting for `accept()`.
pub const DEFAULT_BACKLOG: usize = 128;

/// How many routed payloads a connection may hold before its reader runs.
///
/// The demux loop never waits on an inbox. With `Unbounded` a slow reader
/// only grows its own queue; with `Bounded(n)` the payload that would
/// exceed `n` queued chunks is dropped and reported as
/// [`Event::InboxOverflow`](crate::Event::InboxOverflow).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InboxPolicy {
    #[default]
    Unbounded,
    Bounded(usize),
}

fn default_event_sink() -> SharedSink {
    Arc::new(TracingSink::new(Level::DEBUG))
}

fn default_error_sink() -> SharedSink {
    Arc::new(TracingSink::new(Level::WARN))
}

/// Options applied to one dialed connection.
#[derive(Clone)]
pub struct DialOptions {
    pub event_sink: SharedSink,
    pub error_sink: SharedSink,
    pub inbox: InboxPolicy,
}

impl DialOptions {
    /// Sink for lifecycle and traffic events of this connection.
    pub fn with_event_sink(mut self, sink: SharedSink) -> Self {
        self.event_sink = sink;
        self
    }

    /// Sink for handshake failures and dropped payloads of this connection.
    pub fn with_error_sink(mut self, sink: SharedSink) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn with_inbox(mut self, inbox: InboxPolicy) -> Self {
        self.inbox = inbox;
        self
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(Arc::clone(&self.event_sink), Arc::clone(&self.error_sink))
    }
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            event_sink: default_event_sink(),
            error_sink: default_error_sink(),
            inbox: InboxPolicy::default(),
        }
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("inbox", &self.inbox)
            .finish_non_exhaustive()
    }
}

/// Options applied to a listener and every connection it accepts.
#[derive(Clone)]
pub struct ListenOptions {
    pub event_sink: SharedSink,
    pub error_sink: SharedSink,
    /// Inbox policy of accepted connections.
    pub inbox: InboxPolicy,
    /// Accepted connections waiting for `accept()`. Handshakes beyond this
    /// are rejected. Default: 128.
    pub backlog: usize,
    /// Upper bound on live connections on the stream. Default: none.
    pub max_connections: Option<usize>,
}

impl ListenOptions {
    pub fn with_event_sink(mut self, sink: SharedSink) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_error_sink(mut self, sink: SharedSink) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn with_inbox(mut self, inbox: InboxPolicy) -> Self {
        self.inbox = inbox;
        self
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(Arc::clone(&self.event_sink), Arc::clone(&self.error_sink))
    }
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            event_sink: default_event_sink(),
            error_sink: default_error_sink(),
            inbox: InboxPolicy::default(),
            backlog: DEFAULT_BACKLOG,
            max_connections: None,
        }
    }
}

impl fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenOptions")
            .field("inbox", &self.inbox)
            .field("backlog", &self.backlog)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

/// Configuration of one physical stream.
#[derive(Clone)]
pub struct StreamConfig {
    pub frame: FrameConfig,
    /// Sink for stream-level events.
    pub event_sink: SharedSink,
    /// Sink for malformed frames, unroutable frames and stream failure.
    pub error_sink: SharedSink,
}

impl StreamConfig {
    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.frame.mode = mode;
        self
    }

    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.frame.max_payload_size = max;
        self
    }

    pub fn with_event_sink(mut self, sink: SharedSink) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn with_error_sink(mut self, sink: SharedSink) -> Self {
        self.error_sink = sink;
        self
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(Arc::clone(&self.event_sink), Arc::clone(&self.error_sink))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            event_sink: default_event_sink(),
            error_sink: default_error_sink(),
        }
    }
}

impl From<FrameConfig> for StreamConfig {
    fn from(frame: FrameConfig) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}
