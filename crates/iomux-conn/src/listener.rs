use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::conn::{ConnAddr, VirtualConn};
use crate::error::{MuxError, Result};
use crate::options::ListenOptions;
use crate::stream::MuxStream;
use crate::table::Acceptor;

/// Address of a listener: the `io` network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ListenerAddr;

impl ListenerAddr {
    pub fn network(&self) -> &'static str {
        ConnAddr::NETWORK
    }
}

impl std::fmt::Display for ListenerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(ConnAddr::NETWORK)
    }
}

/// Accepts virtual connections opened by the peer.
///
/// Every frame with an unknown identifier is a connection request: the
/// demux loop registers it, acknowledges it and queues it here. Dropping
/// the listener closes it.
pub struct Listener {
    stream: MuxStream,
    scope: CancellationToken,
    backlog: AsyncMutex<mpsc::Receiver<VirtualConn>>,
    closed: AtomicBool,
}

/// Listen for connections on `stream` with default options.
pub async fn listen(scope: &CancellationToken, stream: MuxStream) -> Result<Listener> {
    listen_with_options(scope, stream, ListenOptions::default()).await
}

/// Listen for connections on `stream`.
///
/// The listener's scope is a child of `scope`; when it fires, pending and
/// later `accept()` calls fail with [`MuxError::ContextCanceled`] and the
/// stream is shut down. A stream carries at most one listener.
pub async fn listen_with_options(
    scope: &CancellationToken,
    stream: MuxStream,
    options: ListenOptions,
) -> Result<Listener> {
    if scope.is_cancelled() {
        return Err(MuxError::ContextCanceled);
    }

    let scope = scope.child_token();
    let (tx, rx) = mpsc::channel(options.backlog.max(1));
    stream.install_acceptor(Acceptor {
        backlog: tx,
        scope: scope.clone(),
        inbox: options.inbox,
        max_connections: options.max_connections,
        diagnostics: options.diagnostics(),
    })?;
    stream.start();
    stream.terminate_on(scope.clone(), "listener canceled");
    tracing::debug!(
        backlog = options.backlog,
        max_connections = ?options.max_connections,
        "listening on physical stream"
    );

    Ok(Listener {
        stream,
        scope,
        backlog: AsyncMutex::new(rx),
        closed: AtomicBool::new(false),
    })
}

impl Listener {
    /// Wait for the next connection opened by the peer.
    pub async fn accept(&self) -> Result<VirtualConn> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        let mut backlog = tokio::select! {
            biased;
            _ = self.scope.cancelled() => return Err(self.cancelled_error()),
            backlog = self.backlog.lock() => backlog,
        };
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(self.cancelled_error()),
            conn = backlog.recv() => conn.ok_or_else(|| self.stream.closed_error()),
        }
    }

    /// Close the listener. Idempotent.
    ///
    /// Cancels the listener scope and shuts the stream down: pending
    /// `accept()` calls fail with `Closed`, every connection on the stream
    /// is released.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.scope.cancel();
        self.stream.terminate("listener closed");
        Ok(())
    }

    /// Whether `close()` has run on this listener.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn addr(&self) -> ListenerAddr {
        ListenerAddr
    }

    /// The physical stream; it can also be used for outbound dials.
    pub fn stream(&self) -> &MuxStream {
        &self.stream
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    fn cancelled_error(&self) -> MuxError {
        if self.is_closed() {
            MuxError::Closed
        } else {
            MuxError::ContextCanceled
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("stream", &self.stream)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
