//! Byte counting for streamed transfers.
//!
//! [`ProgressReader`] wraps any [`AsyncRead`] and publishes the running
//! total after each successful read on a single-slot channel. Publishing
//! never blocks: if the slot is still occupied the new total is dropped and
//! the consumer sees it with the next read. Consumers must treat every value
//! as the current total, never as a delta.
//!
//! [`Throttle`] limits how often a progress line is rendered.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Minimum interval between two rendered progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// An [`AsyncRead`] adapter that counts bytes and publishes the total.
#[derive(Debug)]
pub struct ProgressReader<R> {
    inner: R,
    count: u64,
    notify: Option<mpsc::Sender<u64>>,
}

impl<R> ProgressReader<R> {
    /// Wrap `inner`. Returns the reader and the receiving end of its
    /// single-slot notification channel.
    pub fn new(inner: R) -> (Self, mpsc::Receiver<u64>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                inner,
                count: 0,
                notify: Some(tx),
            },
            rx,
        )
    }

    /// Total bytes read so far.
    pub const fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Whether [`close`](Self::close) has been called.
    pub const fn is_closed(&self) -> bool {
        self.notify.is_none()
    }

    /// Close the notification channel.
    ///
    /// The receiver observes the end of the stream once it has drained the
    /// slot. Further reads fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReaderClosed`] when called a second time.
    pub fn close(&mut self) -> Result<()> {
        self.notify.take().map(drop).ok_or(Error::ReaderClosed)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(notify) = this.notify.as_ref() else {
            return Poll::Ready(Err(io::Error::other("read from closed progress reader")));
        };

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;

        if n > 0 {
            this.count += n as u64;
            // Full slot: the consumer gets a newer total on a later read.
            let _ = notify.try_send(this.count);
        }

        Poll::Ready(Ok(()))
    }
}

/// Time-based rate limiter for progress updates.
///
/// The first update always passes, as does the one that reaches the total.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given minimum interval.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns whether the update `(done, total)` should be delivered now.
    pub fn should_emit(&mut self, done: u64, total: u64) -> bool {
        let now = Instant::now();
        let due = self
            .last
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if due || done >= total {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}
