use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{Fault, Result, TrpcError};
use crate::protocol::{ErrorObject, Response};

/// Length prefix type (sent big-endian)
pub type Header = u32;

/// Size of the length prefix in bytes
pub const HEADER_SIZE: usize = std::mem::size_of::<Header>();

/// Receive buffer capacity (16 KiB). A frame, prefix included, must fit.
pub const BUF_SIZE: usize = 1 << 14;

/// A serialized envelope, ready to be written as prefix then body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    /// JSON body
    pub bytes: Vec<u8>,
    /// Body length in host order
    pub length: Header,
    /// Body length as it goes on the wire
    pub be_length: [u8; HEADER_SIZE],
}

/// Wire codec for trpc frames.
///
/// A frame is a 4-byte big-endian length `N` followed by `N` bytes of JSON
/// envelope. The codec never performs I/O; it only inspects and produces
/// byte buffers.
///
/// # Example
///
/// ```
/// use trpc_common::transport::Codec;
/// use trpc_common::protocol::Request;
/// use serde_json::json;
///
/// let codec = Codec::new();
/// let request = Request::new(1, "add", vec![json!(1), json!(2)]);
///
/// let frame = codec.encode_frame(&request).unwrap();
/// assert!(codec.verify(&frame));
///
/// let decoded: Request = codec.decode(&frame).unwrap();
/// assert_eq!(decoded, request);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Codec
    }

    /// Reads the declared body length from the start of `buf`.
    ///
    /// Returns `None` when `buf` is shorter than the length prefix.
    pub fn frame_length(&self, buf: &[u8]) -> Option<usize> {
        let prefix: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Header::from_be_bytes(prefix) as usize)
    }

    /// True iff `buf` holds at least one complete frame.
    pub fn verify(&self, buf: &[u8]) -> bool {
        match self.frame_length(buf) {
            Some(length) => buf.len() >= HEADER_SIZE + length,
            None => false,
        }
    }

    /// Decodes the envelope carried by the frame at the start of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if `buf` does not hold a complete frame and a
    /// JSON error if the body is malformed.
    pub fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T> {
        let length = self
            .frame_length(buf)
            .ok_or_else(|| TrpcError::Protocol("frame header is incomplete".to_string()))?;
        let body = buf.get(HEADER_SIZE..HEADER_SIZE + length).ok_or_else(|| {
            TrpcError::Protocol(format!(
                "frame declares {} bytes but only {} are buffered",
                length,
                buf.len().saturating_sub(HEADER_SIZE)
            ))
        })?;
        Ok(serde_json::from_slice(body)?)
    }

    /// Serializes an envelope and precomputes both host and wire lengths.
    ///
    /// The prefix and body are kept apart so the caller can write them with
    /// two separate operations.
    pub fn dump<T: Serialize>(&self, envelope: &T) -> Result<Dump> {
        let bytes = serde_json::to_vec(envelope)?;
        let length = Header::try_from(bytes.len()).map_err(|_| TrpcError::FrameTooLarge {
            length: bytes.len(),
            capacity: Header::MAX as usize,
        })?;
        Ok(Dump {
            bytes,
            length,
            be_length: length.to_be_bytes(),
        })
    }

    /// Serializes an envelope into one contiguous frame (prefix + body).
    pub fn encode_frame<T: Serialize>(&self, envelope: &T) -> Result<Vec<u8>> {
        let dump = self.dump(envelope)?;
        let mut frame = Vec::with_capacity(HEADER_SIZE + dump.bytes.len());
        frame.extend_from_slice(&dump.be_length);
        frame.extend_from_slice(&dump.bytes);
        Ok(frame)
    }

    /// Turns `response` into a failure response for `fault`.
    ///
    /// Any `result` member is removed; `error.message` is only set when the
    /// fault has something to say.
    pub fn make_error_envelope(&self, response: &mut Response, fault: &Fault) {
        response.result = None;
        response.error = Some(ErrorObject::from(fault));
    }
}
