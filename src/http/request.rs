//! Per-request context handed to handlers, gates, and error handlers.
//!
//! # Responsibilities
//! - Carry method, path, query parameters, headers, and buffered body
//! - Generate a unique request ID (UUID v4) for log correlation
//! - Track which path segments the matched handler consumed
//!   (`node_path`) and which remain (`unused`)

use bytes::Bytes;
use hyper::header::HeaderMap;
use hyper::Method;
use uuid::Uuid;

/// A fully buffered, dispatch-ready request.
///
/// The transport builds one of these after reading the body; test code
/// can construct one directly with [`Request::new`].
pub struct Request {
    id: Uuid,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    /// Segments consumed by the matched handler's node. Maintained by
    /// the dispatcher.
    pub(crate) node_path: Vec<String>,
    /// Segments past the matched node, available to the handler as a
    /// suffix. Maintained by the dispatcher.
    pub(crate) unused: Vec<String>,
}

impl Request {
    /// Build a request from a method and a path with optional query
    /// string, e.g. `"/a/b?x=1"`.
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path_and_query, None),
        };
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.to_string(),
            query: parse_query(query),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            node_path: Vec::new(),
            unused: Vec::new(),
        }
    }

    /// Build a request from hyper's request head plus the collected
    /// body bytes.
    pub fn from_parts(parts: &hyper::http::request::Parts, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parse_query(parts.uri.query()),
            headers: parts.headers.clone(),
            body,
            node_path: Vec::new(),
            unused: Vec::new(),
        }
    }

    /// Unique ID for this request, also echoed in the `x-request-id`
    /// response header.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First query parameter with the given name, if any.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All query parameters, in order of appearance.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// A request header value, when present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The buffered request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Path segments consumed by the matched handler's node.
    pub fn node_path(&self) -> &[String] {
        &self.node_path
    }

    /// Path segments past the matched node.
    pub fn unused(&self) -> &[String] {
        &self.unused
    }
}

fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    match query {
        Some(q) => url::form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        None => Vec::new(),
    }
}
