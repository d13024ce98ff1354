//! Dispatch error taxonomy.
//!
//! # Design Decisions
//! - One enum covers every failure a callback can signal
//! - `Bubble` is a control signal, not a real failure: an error handler
//!   returns it to decline and defer to an ancestor's error handler
//! - Variants carry strings (not source errors) so the type stays `Clone`
//!   and can be stored on the response as the private cause

use thiserror::Error;

/// Errors produced while routing a request through the path tree.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Decline signal from an error handler: try the next handler up
    /// the tree. Never surfaced to the client.
    #[error("bubble")]
    Bubble,

    /// A gate refused to let the request pass.
    #[error("gate rejected: {0}")]
    GateRejected(String),

    /// No handler matched the request path.
    #[error("Invalid Path")]
    InvalidPath,

    /// The matched handler failed.
    #[error("{0}")]
    Handler(String),

    /// A response body could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialize(err.to_string())
    }
}

impl DispatchError {
    /// True for the decline signal, false for genuine failures.
    pub fn is_bubble(&self) -> bool {
        matches!(self, DispatchError::Bubble)
    }
}
