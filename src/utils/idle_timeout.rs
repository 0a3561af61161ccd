//! Per-connection idle timeout.
//!
//! The socket is wrapped in [`ActivityIo`], which stamps an [`Activity`] clock on
//! every successful read or write. [`Activity::idle`] resolves once nothing happened
//! for the whole window, and reports which window ran out.
//!
//! A connection that finished its last response and has not received a byte of the
//! next request is kept alive only for the short keep-alive window and then closed
//! without a response. Everywhere else the longer timeout applies. When it fires, the
//! connection's HTTP machinery may be stuck, so the answer is written with
//! [`write_timeout_response`] straight to a second handle on the same socket instead
//! of going through the pipeline.
use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use axum::body::{Body, Bytes, HttpBody};
use chrono::{DateTime, Utc};
use hyper::body::{Frame, SizeHint};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    sync::Notify,
    time::Instant,
};

/// Which idle window ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleExpiry {
    /// Nothing arrived after the last response; close quietly
    KeepAlive,
    /// A request is pending or in progress; answer with the 503
    Stalled,
}

/// Last-activity clock shared between a connection's I/O, its service and its timer
#[derive(Debug, Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    epoch: Instant,
    /// Milliseconds since `epoch`
    last: AtomicU64,
    /// Reads that returned data
    reads: AtomicU64,
    /// `reads` as of the last finished response
    reads_at_finish: AtomicU64,
    in_flight: AtomicUsize,
    served: AtomicU64,
    changed: Notify,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                epoch: Instant::now(),
                last: AtomicU64::new(0),
                reads: AtomicU64::new(0),
                reads_at_finish: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                served: AtomicU64::new(0),
                changed: Notify::new(),
            }),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.inner.epoch.elapsed().as_millis() as u64;
        self.inner.last.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn record_read(&self) {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    pub fn last_activity(&self) -> Instant {
        self.inner.epoch + Duration::from_millis(self.inner.last.load(Ordering::Relaxed))
    }

    /// Mark a request as handed to the service.
    pub fn request_started(&self) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();
    }

    /// Mark the oldest in-flight response as fully handed to the connection.
    pub fn request_finished(&self) {
        let reads = self.inner.reads.load(Ordering::SeqCst);
        self.inner.reads_at_finish.store(reads, Ordering::SeqCst);
        self.inner.served.fetch_add(1, Ordering::SeqCst);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.touch();
        self.inner.changed.notify_waiters();
    }

    /// Wrap a response body so that its request counts as finished once the body is
    /// dropped.
    pub fn track_response(&self, body: Body) -> Body {
        Body::new(TrackedBody {
            inner: body,
            activity: self.clone(),
        })
    }

    /// True when at least one response went out and nothing of the next request has
    /// arrived yet.
    pub fn between_requests(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) == 0
            && self.inner.served.load(Ordering::SeqCst) > 0
            && self.inner.reads.load(Ordering::SeqCst)
                == self.inner.reads_at_finish.load(Ordering::SeqCst)
    }

    /// Resolves once the window that currently applies has passed without activity:
    /// `keep_alive` between requests, `timeout` otherwise.
    pub async fn idle(&self, timeout: Duration, keep_alive: Duration) -> IdleExpiry {
        loop {
            let changed = self.inner.changed.notified();
            let (window, expiry) = if self.between_requests() {
                (keep_alive, IdleExpiry::KeepAlive)
            } else {
                (timeout, IdleExpiry::Stalled)
            };

            let deadline = self.last_activity() + window;
            if Instant::now() >= deadline {
                return expiry;
            }

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {}
                () = changed => {}
            }
        }
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body that reports its request finished when dropped
struct TrackedBody {
    inner: Body,
    activity: Activity,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.activity.request_finished();
    }
}

/// I/O wrapper that records activity on every byte moved
#[derive(Debug)]
pub struct ActivityIo<T> {
    inner: T,
    activity: Activity,
}

impl<T> ActivityIo<T> {
    pub fn new(inner: T, activity: Activity) -> Self {
        Self { inner, activity }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ActivityIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.activity.record_read();
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ActivityIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write_vectored(cx, bufs);
        if matches!(poll, Poll::Ready(Ok(n)) if n > 0) {
            self.activity.touch();
        }
        poll
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Duplicate the socket so the timeout path can write to it after the HTTP
/// connection that owns the first handle has been dropped.
pub fn split_escape_hatch(stream: TcpStream) -> io::Result<(TcpStream, TcpStream)> {
    let primary = stream.into_std()?;
    let raw = primary.try_clone()?;
    Ok((TcpStream::from_std(primary)?, TcpStream::from_std(raw)?))
}

pub fn timeout_message(timeout: Duration) -> String {
    format!("Timeout of {} seconds exceeded", timeout.as_secs())
}

/// The complete raw HTTP/1.1 response sent when a connection times out.
pub fn timeout_response(timeout: Duration, now: DateTime<Utc>) -> String {
    let message = timeout_message(timeout);
    [
        "HTTP/1.1 503 Service Unavailable".to_string(),
        format!("Date: {}", now.format("%a, %d %b %Y %H:%M:%S GMT")),
        "Content-Type: text/plain".to_string(),
        format!("Content-Length: {}", message.len()),
        "Connection: close".to_string(),
        String::new(),
        message,
    ]
    .join("\r\n")
}

/// Write the timeout response and close the write side of the socket.
pub async fn write_timeout_response<W>(mut socket: W, timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    socket
        .write_all(timeout_response(timeout, Utc::now()).as_bytes())
        .await?;
    socket.shutdown().await
}
