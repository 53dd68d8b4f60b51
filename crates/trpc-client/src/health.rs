//! Connection health tracking.
//!
//! When the read half of a call is abandoned mid-frame, the bytes still in
//! flight are a strict prefix of that stale response. [`Health`] remembers how
//! much of it was consumed and drains the rest before the connection carries
//! a new request, so the next response is never misread as a continuation.

use tokio::net::TcpStream;
use trpc_common::transport::{Header, HEADER_SIZE};

/// Capacity of the drain buffer (4 KiB)
pub const DRAIN_BUF_SIZE: usize = 1 << 12;

/// Non-blocking read attempts allowed per [`Health::check`]
pub const DRAIN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// No outstanding debt
    NoRead,
    /// Part of a stale length prefix was read, body length unknown
    HeaderReadSome,
    /// Stale length prefix known, part of its body was read
    ContentReadSome,
    /// Draining failed; the connection must not be reused
    Undefined,
}

/// Per-client health record.
#[derive(Debug, Clone)]
pub struct Health {
    state: HealthState,
    // bytes of the current stage already consumed
    some: usize,
    // stale body length, meaningful in ContentReadSome only
    content: usize,
    header: [u8; HEADER_SIZE],
}

enum Drain {
    Read(usize),
    Again,
    Dead,
}

impl Default for Health {
    fn default() -> Self {
        Health {
            state: HealthState::NoRead,
            some: 0,
            content: 0,
            header: [0; HEADER_SIZE],
        }
    }
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Bytes of the stale frame's current stage already consumed.
    pub fn some(&self) -> usize {
        self.some
    }

    pub fn expected_content_length(&self) -> usize {
        self.content
    }

    /// Records a response header read that stopped after `partial` bytes.
    ///
    /// Nothing is recorded when no byte arrived: there is no debt to drain.
    pub fn header_read_some(&mut self, partial: &[u8]) {
        if partial.is_empty() {
            return;
        }
        let some = partial.len().min(HEADER_SIZE - 1);
        self.header = [0; HEADER_SIZE];
        self.header[..some].copy_from_slice(&partial[..some]);
        self.some = some;
        self.content = 0;
        self.state = HealthState::HeaderReadSome;
    }

    /// Records a response body read that stopped after `some` of `content` bytes.
    ///
    /// A body larger than [`DRAIN_BUF_SIZE`] pins the record to `Undefined`.
    pub fn content_read_some(&mut self, some: usize, content: usize) {
        if content > DRAIN_BUF_SIZE {
            tracing::warn!(
                length = content,
                capacity = DRAIN_BUF_SIZE,
                "stale response too large to drain"
            );
            self.mark_undefined();
            return;
        }
        self.some = some.min(content);
        self.content = content;
        self.state = HealthState::ContentReadSome;
    }

    pub fn mark_undefined(&mut self) {
        self.state = HealthState::Undefined;
    }

    fn reset(&mut self) {
        self.state = HealthState::NoRead;
        self.some = 0;
        self.content = 0;
    }

    /// Drains any stale partial response left on `stream`.
    ///
    /// Returns true when the connection carries no stale bytes. The fast path
    /// (`NoRead`) performs no syscall. Draining never waits for readiness: it
    /// makes at most [`DRAIN_ATTEMPTS`] non-blocking reads. Only an interrupted
    /// read is retried. A socket with nothing to read, or one that is closed or
    /// failing, pins the record to `Undefined`.
    pub async fn check(&mut self, stream: &TcpStream) -> bool {
        if self.state == HealthState::NoRead {
            return true;
        }

        let mut buf = [0u8; DRAIN_BUF_SIZE];

        for _ in 0..DRAIN_ATTEMPTS {
            let step = match self.state {
                HealthState::NoRead => return true,
                HealthState::Undefined => return false,
                HealthState::HeaderReadSome => {
                    let some = self.some;
                    let step = try_drain(stream, &mut self.header[some..]);
                    if let Drain::Read(n) = step {
                        self.some += n;
                        if self.some == HEADER_SIZE {
                            self.learn_content_length();
                        }
                    }
                    step
                }
                HealthState::ContentReadSome => {
                    let remaining = self.content - self.some;
                    if remaining == 0 {
                        self.reset();
                        continue;
                    }
                    let chunk = remaining.min(DRAIN_BUF_SIZE);
                    let step = try_drain(stream, &mut buf[..chunk]);
                    if let Drain::Read(n) = step {
                        self.some += n;
                        if self.some == self.content {
                            tracing::debug!(drained = self.content, "stale response drained");
                            self.reset();
                        }
                    }
                    step
                }
            };

            match step {
                Drain::Read(_) => {}
                Drain::Again => tokio::task::yield_now().await,
                Drain::Dead => {
                    tracing::warn!(state = ?self.state, "stale response drain failed");
                    self.mark_undefined();
                    return false;
                }
            }
        }

        // the last attempt may have completed the drain
        if self.state == HealthState::ContentReadSome && self.some == self.content {
            self.reset();
        }
        self.state == HealthState::NoRead
    }

    fn learn_content_length(&mut self) {
        let length = Header::from_be_bytes(self.header) as usize;
        if length > DRAIN_BUF_SIZE {
            // a huge stale frame is not worth draining
            tracing::warn!(length, capacity = DRAIN_BUF_SIZE, "stale response too large to drain");
            self.mark_undefined();
            return;
        }
        self.some = 0;
        self.content = length;
        self.state = HealthState::ContentReadSome;
    }
}

fn try_drain(stream: &TcpStream, buf: &mut [u8]) -> Drain {
    match stream.try_read(buf) {
        Ok(0) => Drain::Dead,
        Ok(n) => Drain::Read(n),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Drain::Again,
        // the stale bytes are not there yet; their arrival time is unknown
        Err(_) => Drain::Dead,
    }
}
