//! Tree-routed HTTP server library.
//!
//! Routes requests through an explicit path tree instead of a flat list
//! of regex routes: gates and error handlers registered on an ancestor
//! segment apply to every descendant route, and error recovery bubbles
//! from the failure point up toward the root.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod routing;

pub use config::ServerConfig;
pub use http::{HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use net::Listener;
pub use routing::{DispatchError, Dispatcher, MethodToken, PathTree};
