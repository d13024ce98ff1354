//! Tree-routed HTTP server (v1)
//!
//! An HTTP server that dispatches requests through a hierarchical path
//! tree rather than a flat list of regex routes.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                 TREE ROUTER                  │
//!                    │                                              │
//!   Client Request   │  ┌─────────┐   ┌─────────┐   ┌────────────┐  │
//!   ─────────────────┼─▶│   net   │──▶│  http   │──▶│  routing   │  │
//!                    │  │listener │   │ server  │   │ dispatcher │  │
//!                    │  └─────────┘   └─────────┘   └─────┬──────┘  │
//!                    │                                    │         │
//!                    │                                    ▼         │
//!                    │                              ┌────────────┐  │
//!                    │                              │ path tree  │  │
//!                    │                              │ gates/errs │  │
//!   Client Response  │  ┌─────────┐   ┌─────────┐   └─────┬──────┘  │
//!   ◀────────────────┼──│response │◀──│ http    │◀────────┘         │
//!                    │  │ buffer  │   │ server  │   handler or      │
//!                    │  └─────────┘   └─────────┘   error bubbling  │
//!                    │                                              │
//!                    │  ┌────────────────────────────────────────┐  │
//!                    │  │   config  │  lifecycle  │  tracing      │  │
//!                    │  └────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use hyper::{Method, StatusCode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tree_router::config::{load_config, ServerConfig};
use tree_router::net::Listener;
use tree_router::routing::{DispatchError, MethodToken};
use tree_router::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "tree-router", about = "Tree-routed HTTP server")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tree_router={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tree-router v0.1.0 starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        soft_timeout_ms = config.timeouts.soft_ms,
        hard_timeout_ms = config.timeouts.hard_ms,
        "Configuration loaded"
    );

    let server = HttpServer::new(config.clone());
    register_demo_routes(&server);

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received");
            shutdown.trigger();
        }
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// A small route tree demonstrating handlers, gates, and error
/// bubbling.
fn register_demo_routes(server: &HttpServer) {
    server.register(Method::GET, "/", |_, res| {
        res.send_text("tree-router: try /echo/anything or /admin/status\n");
        Ok(())
    });

    server.register(MethodToken::Any, "/echo", |req, res| {
        res.send_json(&serde_json::json!({
            "method": req.method().as_str(),
            "path": req.path(),
            "node_path": req.node_path(),
            "unused": req.unused(),
            "query": req.query_pairs(),
        }))
    });

    // Everything under /admin requires an authorization header.
    server.add_gate(MethodToken::Any, "/admin", |req, _| {
        if req.header("authorization").is_some() {
            Ok(())
        } else {
            Err(DispatchError::GateRejected(
                "missing authorization header".into(),
            ))
        }
    });

    server.register(Method::GET, "/admin/status", |_, res| {
        res.send_json(&serde_json::json!({"status": "ok"}))
    });

    // Root error handler: turns any unhandled failure into a JSON body
    // with a status matching the public error.
    server.add_error(MethodToken::Any, "/", |_, res| {
        let message = res.error().unwrap_or("Unhandled error.").to_string();
        let status = match message.as_str() {
            "Invalid Path" => StatusCode::NOT_FOUND,
            "Gate closed." => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        res.set_status(status);
        res.send_json(&serde_json::json!({"error": message}))
    });
}
