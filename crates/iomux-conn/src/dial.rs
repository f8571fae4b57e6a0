use iomux_frame::ConnectionId;
use tokio_util::sync::CancellationToken;

use crate::conn::VirtualConn;
use crate::diag::Event;
use crate::error::{MuxError, Result};
use crate::handshake::handshake_client;
use crate::options::DialOptions;
use crate::stream::MuxStream;

/// Open a virtual connection on `stream`.
///
/// Registers a fresh random identifier, sends the handshake and waits for
/// the peer's acknowledgement. The connection's scope is a child of
/// `scope`; cancelling `scope` before the acknowledgement arrives fails the
/// dial with [`MuxError::ContextCanceled`]. On any failure the identifier
/// is unregistered before this returns.
pub async fn dial(
    scope: &CancellationToken,
    stream: &MuxStream,
    options: DialOptions,
) -> Result<VirtualConn> {
    if scope.is_cancelled() {
        return Err(MuxError::ContextCanceled);
    }
    stream.start();

    let diagnostics = options.diagnostics();
    let id = ConnectionId::random();
    let conn = stream.register(id, scope, options.inbox, diagnostics.clone())?;
    diagnostics.emit(Event::Dialed { id });

    match handshake_client(&conn).await {
        Ok(()) => {
            diagnostics.emit(Event::Established { id });
            Ok(conn)
        }
        Err(err) => {
            conn.close()?;
            Err(err)
        }
    }
}
