//! Timeout-bounded, retrying socket I/O.
//!
//! Every operation transfers exactly `buf.len()` bytes or reports how far it
//! got. The total `timeout` is split into `max_retries` readiness waits of
//! `timeout / max_retries` each. Transient conditions (`Interrupted`,
//! `WouldBlock`) are retried inside the budget and never reach the caller.
//!
//! Partial progress is always reported: a caller can tell "nothing
//! happened" (`transferred == 0`) from "half a frame crossed the wire".

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::protocol::error::TrpcError;

/// Why a best-effort operation stopped short.
#[derive(Error, Debug)]
pub enum Cause {
    /// Retry budget or wall-clock timeout exhausted
    #[error("timed out")]
    TimedOut,
    /// Read returned zero bytes (or write accepted none)
    #[error("peer closed")]
    PeerClosed,
    /// Any other system-level failure
    #[error("{0}")]
    Io(io::Error),
}

/// A best-effort operation that did not transfer the requested size.
#[derive(Error, Debug)]
#[error("{cause} after {transferred} bytes")]
pub struct Incomplete {
    /// Bytes transferred before stopping
    pub transferred: usize,
    pub cause: Cause,
}

impl Incomplete {
    fn new(transferred: usize, cause: Cause) -> Self {
        Incomplete { transferred, cause }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, Cause::TimedOut)
    }
}

impl From<Incomplete> for TrpcError {
    fn from(incomplete: Incomplete) -> Self {
        let transferred = incomplete.transferred;
        match incomplete.cause {
            Cause::TimedOut => TrpcError::Timeout { transferred },
            Cause::PeerClosed => TrpcError::PeerClosed { transferred },
            Cause::Io(e) => TrpcError::Io(e),
        }
    }
}

/// Reads exactly `buf.len()` bytes from `stream`.
pub async fn read(
    stream: &TcpStream,
    buf: &mut [u8],
    timeout: Duration,
    max_retries: u32,
) -> Result<(), Incomplete> {
    let size = buf.len();
    transfer(stream, Interest::READABLE, size, timeout, max_retries, |offset| {
        stream.try_read(&mut buf[offset..])
    })
    .await
}

/// Writes all of `buf` to `stream`.
pub async fn write(
    stream: &TcpStream,
    buf: &[u8],
    timeout: Duration,
    max_retries: u32,
) -> Result<(), Incomplete> {
    transfer(stream, Interest::WRITABLE, buf.len(), timeout, max_retries, |offset| {
        stream.try_write(&buf[offset..])
    })
    .await
}

/// Waits up to `timeout` for `stream` to have something to read.
///
/// Nothing is consumed: this only bounds how long an idle kept-alive
/// connection may sit before its next request starts arriving.
pub async fn pending(stream: &TcpStream, timeout: Duration) -> Result<(), Incomplete> {
    match time::timeout(timeout, stream.readable()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Incomplete::new(0, Cause::Io(e))),
        Err(_) => Err(Incomplete::new(0, Cause::TimedOut)),
    }
}

async fn transfer<F>(
    stream: &TcpStream,
    interest: Interest,
    size: usize,
    timeout: Duration,
    max_retries: u32,
    mut attempt: F,
) -> Result<(), Incomplete>
where
    F: FnMut(usize) -> io::Result<usize>,
{
    if size == 0 {
        return Ok(());
    }

    let max_retries = max_retries.max(1);
    let interval = timeout / max_retries;
    let start = Instant::now();
    let mut offset = 0;

    for _ in 0..max_retries {
        if start.elapsed() > timeout {
            return Err(Incomplete::new(offset, Cause::TimedOut));
        }

        match time::timeout(interval, stream.ready(interest)).await {
            // not ready within this slice of the budget
            Err(_) => continue,
            Ok(Err(e)) => return Err(Incomplete::new(offset, Cause::Io(e))),
            Ok(Ok(_)) => {}
        }

        match attempt(offset) {
            Ok(0) => return Err(Incomplete::new(offset, Cause::PeerClosed)),
            Ok(n) => {
                offset += n;
                if offset == size {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // spurious readiness, let the reactor catch up
                tokio::task::yield_now().await;
                continue;
            }
            Err(e) => return Err(Incomplete::new(offset, Cause::Io(e))),
        }
    }

    tracing::trace!(offset, size, "best-effort retry budget exhausted");
    Err(Incomplete::new(offset, Cause::TimedOut))
}
