//! trpc
//!
//! Lightweight RPC over TCP: length-prefixed, JSON-RPC shaped messages, one
//! call at a time per connection.
//!
//! - [`Client`] owns one connection, keeps it usable after lost or late
//!   responses and surfaces failures as `None` (or a [`TrpcError`] through
//!   [`Client::try_call`]).
//! - [`Server`] accepts connections, serves each in its own task and
//!   dispatches requests to typed handlers bound with [`Server::bind`].
//!
//! # Example
//!
//! ```rust,no_run
//! use trpc::{Client, Endpoint, Server};
//!
//! # #[tokio::main]
//! # async fn main() -> trpc::Result<()> {
//! let mut server = Server::make(Endpoint::localhost(2333)).await?;
//! server.bind("add", |a: i64, b: i64| a + b);
//! tokio::spawn(server.start());
//!
//! let mut client = Client::make(Endpoint::localhost(2333)).await?;
//! let sum: Option<i64> = client.call("add", (1, 2)).await;
//! assert_eq!(sum, Some(3));
//! # Ok(())
//! # }
//! ```

pub use trpc_common::{
    protocol, transport, Endpoint, ErrorObject, Fault, Params, Request, Response, Result,
    Token, TrpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, VERSION,
};

pub use trpc_client::{
    Client, ClientConfig, Health, HealthState, IntoParams, TokenGenerator,
};

pub use trpc_server::{
    CallProxy, CloseHandle, FallibleHandler, Handler, Server, ServerConfig, Verdict,
};

pub use trpc_common::transport::NO_TIMEOUT;
