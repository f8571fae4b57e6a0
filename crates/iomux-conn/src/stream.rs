//! Shared handle over one physical stream.
//!
//! A [`MuxStream`] owns the connection table and two background tasks:
//! - the writer task, sole owner of the write half, which writes frame
//!   batches submitted by connections and the demux loop;
//! - the demux task, sole owner of the read half, which reads one frame
//!   at a time and routes it by identifier.
//!
//! Both tasks start on the first dial or listen and hold only a weak
//! reference, so they stop once the last handle is gone.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use iomux_frame::{ConnectionId, Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::conn::{ConnSpec, OnClose, VirtualConn};
use crate::diag::{Diagnostics, Event};
use crate::error::{MuxError, Result};
use crate::inbox::{self, Delivery, InboxReceiver, InboxSender};
use crate::options::{InboxPolicy, StreamConfig};
use crate::table::{Acceptor, Admission, ConnectionTable, Dispatch, TableError};

/// Upper bound on flushing and shutting down the write half at teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A duplex byte stream usable as the physical carrier.
pub trait PhysicalStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PhysicalStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedStream = Box<dyn PhysicalStream>;

/// A batch of frames written back to back by the writer task.
struct Outbound {
    frames: Vec<Frame>,
    done: Option<oneshot::Sender<Result<()>>>,
}

struct Startup {
    io: BoxedStream,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

pub(crate) struct Shared {
    table: ConnectionTable,
    outbound: mpsc::UnboundedSender<Outbound>,
    startup: Mutex<Option<Startup>>,
    shutdown: CancellationToken,
    close_reason: OnceLock<String>,
    config: FrameConfig,
    diagnostics: Diagnostics,
}

impl Shared {
    /// End the stream: stop both tasks, release every connection and the
    /// listener. Only the first reason is kept.
    fn terminate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let first = self.close_reason.set(reason.clone()).is_ok();
        self.shutdown.cancel();

        let (routes, acceptor) = self.table.drain();
        drop(routes);
        drop(acceptor);

        if first {
            tracing::debug!(%reason, "physical stream terminated");
            self.diagnostics.emit(Event::StreamClosed { reason });
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cloneable handle over one physical stream.
///
/// Dialing and listening both go through the same handle; a stream can
/// carry outbound and inbound connections at once.
#[derive(Clone)]
pub struct MuxStream {
    shared: Arc<Shared>,
}

impl MuxStream {
    /// Wrap a physical stream with default configuration (datagram framing).
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_config(io, StreamConfig::default())
    }

    /// Wrap a physical stream with explicit configuration.
    pub fn with_config<T>(io: T, config: StreamConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let diagnostics = config.diagnostics();
        Self {
            shared: Arc::new(Shared {
                table: ConnectionTable::default(),
                outbound: tx,
                startup: Mutex::new(Some(Startup {
                    io: Box::new(io),
                    outbound: rx,
                })),
                shutdown: CancellationToken::new(),
                close_reason: OnceLock::new(),
                config: config.frame,
                diagnostics,
            }),
        }
    }

    /// Frame configuration of this stream.
    pub fn config(&self) -> &FrameConfig {
        &self.shared.config
    }

    /// Number of live virtual connections on this stream.
    pub fn connection_count(&self) -> usize {
        self.shared.table.len()
    }

    /// Whether `id` currently has a table entry.
    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.shared.table.contains(id)
    }

    /// Whether a listener is installed.
    pub fn is_listening(&self) -> bool {
        self.shared.table.has_acceptor()
    }

    /// Whether the stream has terminated. See [`close_reason`](Self::close_reason)
    /// for why.
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Why the stream ended, once it has.
    pub fn close_reason(&self) -> Option<String> {
        self.shared.close_reason.get().cloned()
    }

    /// Stop both tasks and release every connection and the listener.
    pub fn shutdown(&self) {
        self.terminate("stream shut down");
    }

    pub(crate) fn terminate(&self, reason: impl Into<String>) {
        self.shared.terminate(reason);
    }

    pub(crate) fn closed_error(&self) -> MuxError {
        MuxError::StreamClosed(
            self.close_reason()
                .unwrap_or_else(|| "stream shut down".to_string()),
        )
    }

    /// Spawn the writer and demux tasks unless they already run.
    pub(crate) fn start(&self) {
        let startup = self
            .shared
            .startup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Startup { io, outbound }) = startup else {
            return;
        };

        let (read_half, write_half) = tokio::io::split(io);
        let config = self.shared.config.clone();
        let reader = FrameReader::with_config(read_half, config.clone());
        let writer = FrameWriter::with_config(write_half, config);
        let shutdown = self.shared.shutdown.clone();

        tokio::spawn(write_loop(
            Arc::downgrade(&self.shared),
            writer,
            outbound,
            shutdown.clone(),
        ));
        tokio::spawn(demux_loop(Arc::downgrade(&self.shared), reader, shutdown));
    }

    /// End the stream with `reason` when `scope` fires.
    pub(crate) fn terminate_on(&self, scope: CancellationToken, reason: &'static str) {
        let handle = Arc::downgrade(&self.shared);
        let shutdown = self.shared.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = scope.cancelled() => {
                    if let Some(shared) = handle.upgrade() {
                        shared.terminate(reason);
                    }
                }
            }
        });
    }

    /// Queue `frames` for the writer and get notified once they are on the
    /// stream.
    pub(crate) fn submit(&self, frames: Vec<Frame>) -> Result<oneshot::Receiver<Result<()>>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let (tx, rx) = oneshot::channel();
        self.shared
            .outbound
            .send(Outbound {
                frames,
                done: Some(tx),
            })
            .map_err(|_| self.closed_error())?;
        Ok(rx)
    }

    /// Queue `frames` without waiting for them.
    fn enqueue(&self, frames: Vec<Frame>) {
        let _ = self.shared.outbound.send(Outbound { frames, done: None });
    }

    /// Register a locally dialed connection.
    pub(crate) fn register(
        &self,
        id: ConnectionId,
        parent: &CancellationToken,
        policy: InboxPolicy,
        diagnostics: Diagnostics,
    ) -> Result<VirtualConn> {
        let (inbox, receiver) = inbox::channel(policy);
        let generation = self
            .shared
            .table
            .insert(id, inbox, diagnostics.clone())
            .map_err(|err| self.table_error(err, id))?;
        Ok(self.connection(id, parent, receiver, generation, diagnostics))
    }

    pub(crate) fn install_acceptor(&self, acceptor: Acceptor) -> Result<()> {
        self.shared
            .table
            .install_acceptor(acceptor)
            .map_err(|err| match err {
                TableError::AlreadyListening => MuxError::AlreadyListening,
                _ => self.closed_error(),
            })
    }

    fn table_error(&self, err: TableError, id: ConnectionId) -> MuxError {
        match err {
            TableError::Closed => self.closed_error(),
            TableError::Duplicate => MuxError::DuplicateIdentifier(id),
            TableError::AlreadyListening => MuxError::AlreadyListening,
        }
    }

    fn connection(
        &self,
        id: ConnectionId,
        parent: &CancellationToken,
        receiver: InboxReceiver,
        generation: u64,
        diagnostics: Diagnostics,
    ) -> VirtualConn {
        let handle = Arc::downgrade(&self.shared);
        let on_close: OnClose = Box::new(move |id| {
            if let Some(shared) = handle.upgrade() {
                shared.table.remove(id, generation);
            }
        });
        let spec = ConnSpec {
            id,
            parent: parent.clone(),
            on_close: Some(on_close),
        };
        VirtualConn::new(spec, self.clone(), receiver, diagnostics)
    }

    fn dispatch(&self, frame: Frame) {
        let Frame { id, payload } = frame;
        match self.shared.table.dispatch(id) {
            Dispatch::Known { inbox, diagnostics } => deliver(id, &inbox, &diagnostics, payload),
            Dispatch::Admit(admission) => self.admit(id, admission, payload),
            Dispatch::Reject {
                reason,
                diagnostics,
            } => {
                diagnostics.emit(Event::Rejected {
                    id,
                    reason: reason.to_string(),
                });
                self.enqueue(vec![reason.frame(id)]);
            }
            Dispatch::Unroutable => self.shared.diagnostics.emit(Event::Unroutable {
                id,
                len: payload.len(),
            }),
            Dispatch::Closed => {}
        }
    }

    fn admit(&self, id: ConnectionId, admission: Admission, payload: Bytes) {
        let Admission {
            inbox,
            receiver,
            generation,
            scope,
            backlog,
            diagnostics,
        } = admission;
        let conn = self.connection(id, &scope, receiver, generation, diagnostics.clone());

        // The acknowledgement goes out before the connection is visible to
        // accept(), so the dialer never sees data ahead of it.
        self.enqueue(vec![Frame::handshake(id)]);
        if !payload.is_empty() {
            deliver(id, &inbox, &diagnostics, payload);
        }

        match backlog.try_send(conn) {
            Ok(()) => diagnostics.emit(Event::Accepted { id }),
            // Listener went away; dropping the connection unregisters it.
            Err(err) => drop(err),
        }
    }
}

fn deliver(id: ConnectionId, inbox: &InboxSender, diagnostics: &Diagnostics, payload: Bytes) {
    let len = payload.len();
    match inbox.deliver(payload) {
        Delivery::Queued if len > 0 => diagnostics.emit(Event::Received { id, len }),
        Delivery::Queued => {}
        Delivery::Full => diagnostics.emit(Event::InboxOverflow { id, len }),
        Delivery::Closed => diagnostics.emit(Event::Unroutable { id, len }),
    }
}

async fn demux_loop(
    handle: Weak<Shared>,
    mut reader: FrameReader<ReadHalf<BoxedStream>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            next = reader.read_frame() => next,
        };
        let Some(shared) = handle.upgrade() else {
            return;
        };
        let stream = MuxStream { shared };

        match next {
            Ok(frame) => stream.dispatch(frame),
            Err(FrameError::ShortFrame { len }) => {
                stream.shared.diagnostics.emit(Event::ShortFrame { len });
            }
            Err(FrameError::ConnectionClosed) => {
                stream.terminate("end of stream");
                return;
            }
            Err(err) => {
                stream.terminate(err.to_string());
                return;
            }
        }
    }
}

async fn write_loop(
    handle: Weak<Shared>,
    mut writer: FrameWriter<WriteHalf<BoxedStream>>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = outbound.recv() => next,
        };
        let Some(Outbound { frames, done }) = next else {
            break;
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = writer.write_frames(&frames) => result,
        };
        match result {
            Ok(()) => {
                if let Some(done) = done {
                    let _ = done.send(Ok(()));
                }
            }
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                if let Some(done) = done {
                    let _ = done.send(Err(err.into()));
                }
            }
            Err(err) => {
                let reason = err.to_string();
                if let Some(done) = done {
                    let _ = done.send(Err(MuxError::StreamClosed(reason.clone())));
                }
                if let Some(shared) = handle.upgrade() {
                    shared.terminate(reason);
                }
                break;
            }
        }
    }

    // Let the peer see EOF.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
}

impl fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxStream")
            .field("mode", &self.shared.config.mode)
            .field("connections", &self.connection_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
