//! Helpers shared by the end-to-end suites.

#![allow(dead_code)]

use std::time::Duration;

use trpc::{CloseHandle, Endpoint, Server};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a server on an ephemeral loopback port after `configure` bound
/// its methods and hooks.
pub async fn spawn_server(configure: impl FnOnce(&mut Server)) -> (Endpoint, CloseHandle) {
    init_tracing();
    let mut server = Server::make(Endpoint::localhost(0)).await.unwrap();
    configure(&mut server);

    let endpoint = server.local_addr();
    let handle = server.close_handle();
    tokio::spawn(server.start());
    (endpoint, handle)
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
