#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use iomux_conn::{Event, SharedSink};
use iomux_frame::{decode_frame, encode_frame, ConnectionId, Frame};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .unwrap_or_else(|_| panic!("{what} should finish within {WAIT:?}"))
}

/// Poll `cond` until it holds.
pub async fn until(what: &str, mut cond: impl FnMut() -> bool) {
    within(what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
}

/// A physical stream driven by the test: every fed chunk is returned by
/// exactly one read, every write is captured as one chunk.
pub struct ScriptedStream {
    reads: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    writes: mpsc::UnboundedSender<Bytes>,
    current: Bytes,
}

/// The test's side of a [`ScriptedStream`].
pub struct Script {
    feed: mpsc::UnboundedSender<io::Result<Bytes>>,
    written: mpsc::UnboundedReceiver<Bytes>,
}

pub fn scripted() -> (ScriptedStream, Script) {
    let (feed, reads) = mpsc::unbounded_channel();
    let (writes, written) = mpsc::unbounded_channel();
    (
        ScriptedStream {
            reads,
            writes,
            current: Bytes::new(),
        },
        Script { feed, written },
    )
}

impl Script {
    /// Make the next read return `raw` as is.
    pub fn feed_raw(&self, raw: &[u8]) {
        self.feed
            .send(Ok(Bytes::copy_from_slice(raw)))
            .expect("stream should still be reading");
    }

    /// Make the next read return one datagram frame.
    pub fn feed_frame(&self, id: ConnectionId, payload: &[u8]) {
        let mut wire = BytesMut::new();
        encode_frame(&id, payload, &mut wire);
        self.feed_raw(&wire);
    }

    /// Make the next read fail.
    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.feed.send(Err(io::Error::new(kind, "injected failure")));
    }

    /// Make reads return EOF from now on.
    pub fn hang_up(self) -> mpsc::UnboundedReceiver<Bytes> {
        self.written
    }

    /// The next frame the stream wrote.
    pub async fn next_frame(&mut self) -> Frame {
        let chunk = within("next written frame", self.written.recv())
            .await
            .expect("stream should still be writing");
        decode_frame(chunk).expect("written chunk should be one frame")
    }

    /// Whether nothing has been written that was not consumed yet.
    pub fn nothing_written(&mut self) -> bool {
        self.written.try_recv().is_err()
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        while self.current.is_empty() {
            match self.reads.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.current = chunk,
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
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

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes.send(Bytes::copy_from_slice(buf)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A sink that keeps every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn sink(&self) -> SharedSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &Event| {
            events
                .lock()
                .expect("recorder lock should not be poisoned")
                .push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .expect("recorder lock should not be poisoned")
            .clone()
    }

    pub fn contains(&self, pred: impl Fn(&Event) -> bool) -> bool {
        self.events().iter().any(pred)
    }

    pub async fn wait_for(&self, what: &str, pred: impl Fn(&Event) -> bool) {
        until(what, || self.contains(&pred)).await
    }
}
