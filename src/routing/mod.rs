//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → tree.rs (path tree traversal, root to leaf)
//!     → dispatcher.rs (gates, handler selection, error bubbling)
//!     → Response fully written on every exit path
//!
//! Registration (administrative, infrequent):
//!     register/add_gate/add_error
//!     → tree.rs (lazy node creation)
//!     remove*
//!     → tree.rs (removal + pruning)
//! ```
//!
//! # Design Decisions
//! - Explicit path tree instead of a flat regex route table: ancestor
//!   gates and error handlers apply to the whole subtree for free
//! - Longest prefix wins; method-specific beats ANY at the same node
//! - No regex in the hot path; traversal is O(depth)

pub mod dispatcher;
pub mod error;
pub mod method;
pub mod tree;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use method::MethodToken;
pub use tree::{Callback, Flow, Lookup, Node, NodeId, PathTree, Table, WalkOrder};
