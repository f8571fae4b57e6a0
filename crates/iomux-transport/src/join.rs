use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, Stdin, Stdout};

/// A duplex stream assembled from a separate reader and writer.
///
/// Used to treat a process's stdin/stdout, or a spawned child's
/// stdout/stdin, as one physical stream.
#[derive(Debug)]
pub struct Joined<R, W> {
    reader: R,
    writer: W,
}

/// Process stdin (read side) joined with process stdout (write side).
pub type StdioStream = Joined<Stdin, Stdout>;

/// Join a reader and a writer into one duplex stream.
pub fn join<R, W>(reader: R, writer: W) -> Joined<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    Joined { reader, writer }
}

/// The current process's stdin/stdout as one duplex stream.
///
/// Nothing else in the process may write to stdout once this is in use as
/// a physical stream; diagnostics belong on stderr.
pub fn stdio() -> StdioStream {
    join(tokio::io::stdin(), tokio::io::stdout())
}

impl<R, W> Joined<R, W> {
    /// Split back into the reader and the writer.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for Joined<R, W> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for Joined<R, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
