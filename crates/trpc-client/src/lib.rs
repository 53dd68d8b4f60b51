//! trpc Client
//!
//! A [`Client`] owns one TCP connection and issues one call at a time over
//! it. Request building, correlation tokens and stale-response draining
//! live here; the wire codec and best-effort I/O come from `trpc-common`.

pub mod client;
pub mod health;
pub mod params;
pub mod token;

pub use client::{Client, ClientConfig, DEFAULT_MAX_RETRIES};
pub use health::{Health, HealthState};
pub use params::IntoParams;
pub use token::TokenGenerator;
