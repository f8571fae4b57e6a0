//! In-memory duplex pipe.
//!
//! Every `poll_write` becomes one message, and a read never returns bytes
//! from two different messages. A message larger than the read buffer is
//! handed out over several reads. This keeps the one-write-one-read
//! correspondence the datagram framing relies on, which a plain
//! `tokio::io::duplex` (a coalescing byte buffer) does not.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// One end of an in-memory pipe created by [`pipe`].
#[derive(Debug)]
pub struct PipeEnd {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
}

/// Create a connected pair of pipe ends.
///
/// Bytes written to one end are read from the other. Dropping or shutting
/// down one end makes the other end read EOF.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    (
        PipeEnd {
            tx: Some(left_tx),
            rx: left_rx,
            current: Bytes::new(),
        },
        PipeEnd {
            tx: Some(right_tx),
            rx: right_rx,
            current: Bytes::new(),
        },
    )
}

impl AsyncRead for PipeEnd {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while self.current.is_empty() {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(message)) => self.current = message,
                // Peer gone: EOF.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = self.current.len().min(buf.remaining());
        buf.put_slice(&self.current[..n]);
        self.current.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for PipeEnd {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let Some(tx) = self.tx.as_ref() else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe end shut down",
            )));
        };
        if tx.send(Bytes::copy_from_slice(buf)).is_err() {
            self.tx = None;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer pipe end dropped",
            )));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx = None;
        Poll::Ready(Ok(()))
    }
}
