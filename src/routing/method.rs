//! Method tokens used as keys in the routing tables.

use std::fmt;

use hyper::Method;

/// Key for the per-node handler/gate/error tables.
///
/// A registration bound to [`MethodToken::Any`] applies to every HTTP
/// method. This makes it easy to define, for example, a catch-all error
/// handler or a universal authentication gate in one function.
///
/// Using a sum type as the map key gives `Any` real identity semantics:
/// it can never collide with a concrete method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodToken {
    /// Matches every HTTP method.
    Any,
    /// Matches exactly one HTTP method.
    Exact(Method),
}

impl From<Method> for MethodToken {
    fn from(method: Method) -> Self {
        MethodToken::Exact(method)
    }
}

impl From<&Method> for MethodToken {
    fn from(method: &Method) -> Self {
        MethodToken::Exact(method.clone())
    }
}

impl fmt::Display for MethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodToken::Any => write!(f, "ANY"),
            MethodToken::Exact(m) => write!(f, "{}", m),
        }
    }
}
