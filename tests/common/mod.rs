//! Shared test helpers: boot a configured server on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;

use tree_router::config::ServerConfig;
use tree_router::net::Listener;
use tree_router::{HttpServer, Shutdown};

/// Start a server on an ephemeral port. `setup` registers routes before
/// the accept loop starts. Returns the bound address and the shutdown
/// coordinator; dropping the coordinator leaves the server running for
/// the test's lifetime.
pub async fn start_server(
    mut config: ServerConfig,
    setup: impl FnOnce(&HttpServer),
) -> (SocketAddr, Shutdown) {
    config.listener.bind_address = "127.0.0.1:0".to_string();

    let server = HttpServer::new(config.clone());
    setup(&server);

    let listener = Listener::bind(&config.listener)
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("no local addr");

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    (addr, shutdown)
}

/// A reqwest client that never reuses pooled connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .expect("failed to build test client")
}
