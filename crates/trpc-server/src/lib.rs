//! trpc Server
//!
//! A [`Server`] listens on one endpoint, serves every accepted connection in
//! its own task and dispatches requests to the methods bound with
//! [`Server::bind`].

pub mod dispatch;
pub mod server;

pub use dispatch::{CallProxy, FallibleHandler, Handler};
pub use server::{
    CloseHandle, Server, ServerConfig, Verdict, DEFAULT_MAX_RETRIES, DEFAULT_PENDING,
};
