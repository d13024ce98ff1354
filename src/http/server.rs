//! HTTP transport over the dispatcher.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Speak HTTP/1.1 per connection via hyper
//! - Enforce soft (header read) and hard (connection lifetime) timeouts
//! - Buffer request bodies up to the configured limit
//! - Run the dispatcher and write the produced response
//! - Expose the registration API, serialized behind a write lock
//!
//! # Design Decisions
//! - The per-request service error type is `Infallible`: the dispatcher
//!   guarantees a fully written response on every exit path, so the
//!   transport has nothing to convert into a hyper error
//! - Dispatch runs under a read lock with no await points; traversals
//!   never block each other, registration briefly blocks traversals

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::http::{Request, Response};
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::routing::{Callback, DispatchError, Dispatcher, MethodToken};

struct ServerInner {
    config: ServerConfig,
    dispatcher: RwLock<Dispatcher>,
    tracker: ConnectionTracker,
}

/// HTTP server routing requests through a path tree.
pub struct HttpServer {
    inner: Arc<ServerInner>,
}

impl HttpServer {
    /// Create a server with an empty route tree.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                dispatcher: RwLock::new(Dispatcher::new()),
                tracker: ConnectionTracker::new(),
            }),
        }
    }

    fn dispatcher_mut(&self) -> std::sync::RwLockWriteGuard<'_, Dispatcher> {
        // The lock can only be poisoned by a panicking registration,
        // which aborts startup anyway.
        self.inner.dispatcher.write().expect("dispatcher lock poisoned")
    }

    /// Register a request handler at `path` for `method`.
    pub fn register<M, F>(&self, method: M, path: &str, handler: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.dispatcher_mut().register(method, path, handler);
    }

    /// Remove a request handler. Returns the removed callback, if any;
    /// removing a missing registration returns `None` and changes
    /// nothing.
    pub fn unregister<M: Into<MethodToken>>(&self, method: M, path: &str) -> Option<Callback> {
        self.dispatcher_mut().unregister(method, path)
    }

    /// Register a gate guarding `path` and everything below it.
    pub fn add_gate<M, F>(&self, method: M, path: &str, gate: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.dispatcher_mut().add_gate(method, path, gate);
    }

    /// Remove a gate. Returns the removed callback, if any.
    pub fn remove_gate<M: Into<MethodToken>>(&self, method: M, path: &str) -> Option<Callback> {
        self.dispatcher_mut().remove_gate(method, path)
    }

    /// Register an error handler covering `path` and everything below it.
    pub fn add_error<M, F>(&self, method: M, path: &str, error_handler: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.dispatcher_mut().add_error(method, path, error_handler);
    }

    /// Remove an error handler. Returns the removed callback, if any.
    pub fn remove_error<M: Into<MethodToken>>(&self, method: M, path: &str) -> Option<Callback> {
        self.dispatcher_mut().remove_error(method, path)
    }

    /// Accept and serve connections until the shutdown signal fires,
    /// then drain in-flight connections before returning.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "HTTP server starting");
        {
            let dispatcher = self
                .inner
                .dispatcher
                .read()
                .expect("dispatcher lock poisoned");
            tracing::debug!(tree = %dispatcher.tree().render(), "Route tree");
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, closing listener");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer, permit)) => {
                            let inner = self.inner.clone();
                            let guard = inner.tracker.track();
                            tokio::spawn(async move {
                                // Held for the connection's lifetime to
                                // keep the accept-time backpressure.
                                let _permit = permit;
                                serve_connection(inner, stream, peer, guard).await;
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        let active = self.inner.tracker.active_count();
        if active > 0 {
            tracing::info!(active_connections = active, "Draining connections");
        }
        self.inner.tracker.drained().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

async fn serve_connection(
    inner: Arc<ServerInner>,
    stream: TcpStream,
    peer: SocketAddr,
    guard: ConnectionGuard,
) {
    let connection_id = guard.id();
    tracing::debug!(connection_id = %connection_id, peer_addr = %peer, "Connection opened");

    let soft_ms = inner.config.timeouts.soft_ms;
    let hard_ms = inner.config.timeouts.hard_ms;

    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let inner = inner.clone();
        async move { Ok::<_, Infallible>(handle_request(inner, req).await) }
    });

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new());
    if soft_ms > 0 {
        // Soft timeout: maximum wait for a request's header section.
        builder.header_read_timeout(Duration::from_millis(soft_ms));
    }

    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    if hard_ms > 0 {
        // Hard timeout: absolute cap on the connection's lifetime.
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(connection_id = %connection_id, error = %err, "Connection closed with error");
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(hard_ms)) => {
                tracing::debug!(connection_id = %connection_id, "Hard timeout reached, shutting connection down");
                conn.as_mut().graceful_shutdown();
                let _ = conn.as_mut().await;
            }
        }
    } else if let Err(err) = conn.as_mut().await {
        tracing::debug!(connection_id = %connection_id, error = %err, "Connection closed with error");
    }

    tracing::trace!(connection_id = %connection_id, "Connection finished");
}

async fn handle_request(
    inner: Arc<ServerInner>,
    req: hyper::Request<Incoming>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, inner.config.limits.max_body_bytes)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                error = %err,
                "Failed to buffer request body"
            );
            let mut response = Response::new();
            response.set_status(StatusCode::PAYLOAD_TOO_LARGE);
            response.send_text("Payload too large.");
            return response.into_hyper(uuid::Uuid::new_v4());
        }
    };

    let mut request = Request::from_parts(&parts, body);
    let mut response = Response::new();
    let request_id = request.id();

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %request.path(),
        "Dispatching request"
    );

    {
        let dispatcher = inner
            .dispatcher
            .read()
            .expect("dispatcher lock poisoned");
        dispatcher.dispatch(&mut request, &mut response);
    }

    tracing::debug!(
        request_id = %request_id,
        status = %response.status(),
        "Request complete"
    );

    response.into_hyper(request_id)
}
