//! trpc Common Types and Transport
//!
//! This crate provides the endpoint type, message envelopes, error taxonomy,
//! wire codec and best-effort socket I/O shared by the trpc client and server.
//!
//! # Architecture
//!
//! The system uses a simple wire protocol:
//! - **Transport**: TCP, one outstanding call per connection
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Frame Size**: 16 KiB including the prefix
//!
//! # Components
//!
//! - [`endpoint`] - IPv4 address + port
//! - [`protocol`] - Request/Response envelopes, `TrpcError`, application `Fault`s
//! - [`transport`] - Codec and best-effort I/O
//!
//! # Example
//!
//! ```
//! use trpc_common::{Request, Response};
//! use trpc_common::transport::Codec;
//! use serde_json::json;
//!
//! let codec = Codec::new();
//! let request = Request::new(1, "add", vec![json!(1), json!(2)]);
//! let frame = codec.encode_frame(&request).unwrap();
//!
//! assert!(codec.verify(&frame));
//!
//! let reply = codec.encode_frame(&Response::success(request.id, json!(3))).unwrap();
//! let response: Response = codec.decode(&reply).unwrap();
//! assert_eq!(response.id, request.id);
//! assert_eq!(response.result, Some(json!(3)));
//! ```

pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use endpoint::Endpoint;
pub use protocol::*;
