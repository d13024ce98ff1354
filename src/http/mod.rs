//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, timeouts, body limits)
//!     → request.rs (buffered request, request ID, query parsing)
//!     → [routing::Dispatcher decides the handler]
//!     → response.rs (buffered response, error pair)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::Request;
pub use response::Response;
pub use server::HttpServer;
