//! trpc Transport Layer
//!
//! # Wire Format
//!
//! ```text
//! [4 bytes: big-endian body length N] [N bytes: JSON envelope]
//! ```
//!
//! # Components
//!
//! - **[`Codec`]**: frame length, verification, encode/decode, error envelopes
//! - **[`best_effort`]**: timeout-bounded read/write over non-blocking sockets
//!
//! Frames whose prefix plus body exceed [`BUF_SIZE`] are never buffered:
//! receivers abort the connection instead of allocating.

use std::time::Duration;

pub mod best_effort;
pub mod codec;

pub use best_effort::{Cause, Incomplete};
pub use codec::{Codec, Dump, Header, BUF_SIZE, HEADER_SIZE};

/// Timeout used when none is configured (512 hours)
pub const NO_TIMEOUT: Duration = Duration::from_secs(512 * 60 * 60);
