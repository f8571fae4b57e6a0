//! Connection handshake.
//!
//! The dialer sends a frame with its fresh identifier and no payload. The
//! listener answers on the same identifier with an empty frame to accept,
//! or with a UTF-8 failure message to refuse.

use std::fmt;

use bytes::Bytes;
use iomux_frame::{ConnectionId, Frame};

use crate::conn::VirtualConn;
use crate::diag::Event;
use crate::error::{MuxError, Result};

/// Why a listener refused an unknown identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The accept backlog is full.
    BacklogFull,
    /// The stream is at its connection limit.
    ConnectionLimit,
}

impl Rejection {
    /// The failure message sent to the dialer.
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::BacklogFull => "accept backlog full",
            Rejection::ConnectionLimit => "connection limit reached",
        }
    }

    /// The reply frame carrying this rejection.
    pub fn frame(&self, id: ConnectionId) -> Frame {
        Frame::new(id, Bytes::from_static(self.message().as_bytes()))
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Interpret the first frame received after a handshake request.
pub fn check_reply(reply: &[u8]) -> Result<()> {
    if reply.is_empty() {
        Ok(())
    } else {
        Err(MuxError::HandshakeFailed(
            String::from_utf8_lossy(reply).into_owned(),
        ))
    }
}

/// Run the dialing side of the handshake on a registered connection.
pub(crate) async fn handshake_client(conn: &VirtualConn) -> Result<()> {
    let id = conn.id();
    conn.send(vec![Frame::handshake(id)]).await?;
    conn.diagnostics().emit(Event::HandshakeSent { id });

    let reply = conn.next_chunk().await?;
    let result = check_reply(&reply);
    if let Err(MuxError::HandshakeFailed(reason)) = &result {
        conn.diagnostics().emit(Event::HandshakeFailed {
            id,
            reason: reason.clone(),
        });
    }
    result
}
