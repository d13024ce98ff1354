//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (IDs, drain tracking)
//!     → Hand off to HTTP layer
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
