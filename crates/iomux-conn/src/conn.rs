use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::{Buf, Bytes};
use iomux_frame::{ConnectionId, Frame};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::diag::{Diagnostics, Event};
use crate::error::{MuxError, Result};
use crate::inbox::InboxReceiver;
use crate::stream::MuxStream;

/// Callback run exactly once when a connection closes.
pub type OnClose = Box<dyn FnOnce(ConnectionId) + Send>;

/// Everything a virtual connection is built from.
pub(crate) struct ConnSpec {
    pub(crate) id: ConnectionId,
    /// The connection's scope is a child of this token.
    pub(crate) parent: CancellationToken,
    pub(crate) on_close: Option<OnClose>,
}

/// Address of a virtual connection: the `io` network plus its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnAddr {
    id: ConnectionId,
}

impl ConnAddr {
    pub const NETWORK: &'static str = "io";

    pub fn new(id: ConnectionId) -> Self {
        Self { id }
    }

    pub fn network(&self) -> &'static str {
        Self::NETWORK
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Self::NETWORK, self.id)
    }
}

struct InboxState {
    receiver: InboxReceiver,
    /// Rest of a routed chunk that did not fit the caller's buffer.
    pending: Bytes,
}

/// One ordered, bidirectional virtual connection.
///
/// All operations take `&self`; a connection can be shared between a
/// reading task and a writing task. Dropping it closes it.
pub struct VirtualConn {
    id: ConnectionId,
    stream: MuxStream,
    inbox: AsyncMutex<InboxState>,
    scope: CancellationToken,
    released: CancellationToken,
    closed: AtomicBool,
    on_close: Mutex<Option<OnClose>>,
    diagnostics: Diagnostics,
}

impl VirtualConn {
    pub(crate) fn new(
        spec: ConnSpec,
        stream: MuxStream,
        receiver: InboxReceiver,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            id: spec.id,
            stream,
            inbox: AsyncMutex::new(InboxState {
                receiver,
                pending: Bytes::new(),
            }),
            scope: spec.parent.child_token(),
            released: CancellationToken::new(),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(spec.on_close),
            diagnostics,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_addr(&self) -> ConnAddr {
        ConnAddr::new(self.id)
    }

    pub fn remote_addr(&self) -> ConnAddr {
        ConnAddr::new(self.id)
    }

    /// Cancellation scope of this connection.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// The physical stream this connection runs over.
    pub fn stream(&self) -> &MuxStream {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Read routed bytes into `buf`.
    ///
    /// Waits until data arrives. A chunk larger than `buf` is handed out
    /// over several reads. Fails with `ContextCanceled` once the scope
    /// fires, `Closed` after [`close`](Self::close) and `StreamClosed`
    /// once the physical stream has ended.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inbox = self.lock_inbox().await?;
        if buf.is_empty() {
            return Ok(0);
        }

        let state = &mut *inbox;
        while state.pending.is_empty() {
            // Empty chunks are handshake frames, never data.
            state.pending = self.recv(&mut state.receiver).await?;
        }

        let n = state.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&state.pending[..n]);
        state.pending.advance(n);
        self.diagnostics.emit(Event::Read { id: self.id, len: n });
        Ok(n)
    }

    /// Write `buf` as one or more consecutive frames.
    ///
    /// Returns once the writer task has put every frame on the stream.
    /// Frames of one call never interleave with frames of another call.
    /// An empty `buf` writes nothing.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let max = self.stream.config().max_frame_payload().max(1);
        let frames = buf
            .chunks(max)
            .map(|chunk| Frame::new(self.id, Bytes::copy_from_slice(chunk)))
            .collect();
        self.send(frames).await?;
        self.diagnostics.emit(Event::Wrote {
            id: self.id,
            len: buf.len(),
        });
        Ok(buf.len())
    }

    /// Close the connection. Idempotent; never blocks.
    ///
    /// The table entry is removed before this returns, so a later frame with
    /// the same identifier is treated as a new connection. Pending reads and
    /// writes fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.released.cancel();

        let on_close = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_close) = on_close {
            on_close(self.id);
        }
        self.diagnostics.emit(Event::Closed { id: self.id });
        Ok(())
    }

    /// Submit frames to the writer task and wait for them to be written.
    pub(crate) async fn send(&self, frames: Vec<Frame>) -> Result<()> {
        self.check_open()?;
        let done = self.stream.submit(frames)?;
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(MuxError::ContextCanceled),
            _ = self.released.cancelled() => Err(MuxError::Closed),
            result = done => result.unwrap_or_else(|_| Err(self.stream.closed_error())),
        }
    }

    /// The next routed chunk, empty ones included.
    pub(crate) async fn next_chunk(&self) -> Result<Bytes> {
        let mut inbox = self.lock_inbox().await?;
        if !inbox.pending.is_empty() {
            return Ok(std::mem::take(&mut inbox.pending));
        }
        self.recv(&mut inbox.receiver).await
    }

    fn check_open(&self) -> Result<()> {
        if self.scope.is_cancelled() {
            return Err(MuxError::ContextCanceled);
        }
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        Ok(())
    }

    async fn lock_inbox(&self) -> Result<AsyncMutexGuard<'_, InboxState>> {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(MuxError::ContextCanceled),
            _ = self.released.cancelled() => Err(MuxError::Closed),
            inbox = self.inbox.lock() => Ok(inbox),
        }
    }

    async fn recv(&self, receiver: &mut InboxReceiver) -> Result<Bytes> {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(MuxError::ContextCanceled),
            _ = self.released.cancelled() => Err(MuxError::Closed),
            chunk = receiver.recv() => chunk.ok_or_else(|| self.stream.closed_error()),
        }
    }
}

impl Drop for VirtualConn {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for VirtualConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualConn")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
