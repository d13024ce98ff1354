//! Buffered response context written by handlers.
//!
//! # Responsibilities
//! - Buffer status, headers, and body until dispatch completes
//! - Carry the public/private error pair between dispatcher and
//!   handlers
//! - Convert to a wire response for the transport
//!
//! # Design Decisions
//! - Fully buffered: handlers are synchronous, so nothing is written to
//!   the socket until dispatch has resolved (including error bubbling)
//! - Writes after `end()` are ignored
//! - The public error is safe to show a client; the private error is
//!   the real cause, kept for logs only

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::routing::error::DispatchError;

/// Mutable response state for one dispatch cycle.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    ended: bool,
    error: Option<String>,
    private_error: Option<DispatchError>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            ended: false,
            error: None,
            private_error: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if !self.ended {
            self.status = status;
        }
    }

    /// Set a response header. Invalid names or values are dropped with
    /// a debug log rather than failing the handler.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.ended {
            return;
        }
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                tracing::debug!(header = name, "Dropping invalid response header");
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Append bytes to the body buffer. Ignored after [`end`](Self::end).
    pub fn write(&mut self, bytes: &[u8]) {
        if !self.ended {
            self.body.extend_from_slice(bytes);
        }
    }

    /// Mark the response complete. Later writes are ignored.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Write a text body and end the response.
    pub fn send_text(&mut self, text: &str) {
        self.write(text.as_bytes());
        self.end();
    }

    /// Serialize `value` as JSON, set `content-type` when absent, write
    /// the body, and end the response. A serialization failure is an
    /// ordinary handler failure.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(value)?;
        if self.header("content-type").is_none() {
            self.set_header("content-type", "application/json");
        }
        self.write(&body);
        self.end();
        Ok(())
    }

    /// The public-facing error message, safe to show a client.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Attach a public error message. A handler that sets this without
    /// failing still routes the request into error handling.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// The real cause of the failure. Defaults to the public error when
    /// no component set it explicitly. Never sent to the client.
    pub fn private_error(&self) -> Option<&DispatchError> {
        self.private_error.as_ref()
    }

    pub(crate) fn set_private_error(&mut self, cause: DispatchError) {
        self.private_error = Some(cause);
    }

    pub(crate) fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into a wire response. Sets `content-length` from the
    /// buffer and echoes the request ID as `x-request-id`.
    pub(crate) fn into_hyper(self, request_id: Uuid) -> hyper::Response<Full<Bytes>> {
        let body_len = self.body.len();
        let mut response = hyper::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        response.headers_mut().extend(self.headers);
        response
            .headers_mut()
            .insert("content-length", HeaderValue::from(body_len));
        if let Ok(id) = HeaderValue::try_from(request_id.to_string()) {
            response.headers_mut().insert("x-request-id", id);
        }
        response
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}
