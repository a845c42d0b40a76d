use std::fs::File;
use std::io::Write as _;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Transport wrapper that tees raw protocol bytes into a per-session log
/// file. With no sink attached it is a plain passthrough, so every session
/// shares one concrete transport type whether tracing is on or off.
#[derive(Debug)]
pub struct TraceStream<S> {
    inner: S,
    sink: Option<File>,
}

impl<S> TraceStream<S> {
    pub fn new(inner: S, sink: Option<File>) -> Self {
        Self { inner, sink }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TraceStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if let Some(sink) = this.sink.as_mut() {
                    // Trace failures must never disturb the live connection.
                    let _ = sink.write_all(&buf.filled()[before..]);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TraceStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if let Some(sink) = this.sink.as_mut() {
                    let _ = sink.write_all(&buf[..n]);
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(sink) = this.sink.as_mut() {
            let _ = sink.flush();
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
