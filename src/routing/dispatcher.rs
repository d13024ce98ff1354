//! Request dispatch over the path tree.
//!
//! # Data Flow
//! ```text
//! (method, path)
//!     → split path into segments
//!     → traverse tree root-to-leaf:
//!         collect error handlers, evaluate gates, track best handler
//!     → invoke deepest matched handler (method-specific beats ANY)
//!     → on any failure: try error handlers leaf-to-root ("bubbling")
//!     → nothing accepted: fixed fallback response, never fails
//! ```
//!
//! # Design Decisions
//! - Gates and handlers run strictly root-to-leaf; error handlers run
//!   strictly leaf-to-root
//! - A gate rejection clears any handler matched so far, so nothing at
//!   or below the rejecting node can run
//! - The error-handler stack is collected over the full traversal, so a
//!   handler's failure can be caught by error handlers registered below
//!   the handler's own node
//! - Every failure is converted to a (public, private) error pair on
//!   the response before bubbling starts

use hyper::StatusCode;

use crate::http::{Request, Response};
use crate::routing::error::DispatchError;
use crate::routing::method::MethodToken;
use crate::routing::tree::{Callback, Flow, PathTree, Table};

/// Routes one request at a time through a [`PathTree`].
///
/// Dispatch is fully synchronous: traversal, gates, the handler, and
/// error bubbling all complete within one `dispatch` call. Registration
/// takes `&mut self`; deployments that mutate the tree while serving
/// must wrap the dispatcher in a read-write lock.
pub struct Dispatcher {
    tree: PathTree,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            tree: PathTree::new(),
        }
    }

    /// The underlying tree, for lookups and debug rendering.
    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Register a request handler at `path`.
    pub fn register<M, F>(&mut self, method: M, path: &str, handler: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.tree
            .add(Table::Handlers, path, method.into(), std::sync::Arc::new(handler));
    }

    /// Remove a request handler. Returns the removed callback, if any.
    pub fn unregister<M: Into<MethodToken>>(&mut self, method: M, path: &str) -> Option<Callback> {
        self.tree.remove(Table::Handlers, path, &method.into())
    }

    /// Register a gate at `path`. The gate runs before any handler at or
    /// below `path`; returning an error rejects the request.
    pub fn add_gate<M, F>(&mut self, method: M, path: &str, gate: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.tree
            .add(Table::Gates, path, method.into(), std::sync::Arc::new(gate));
    }

    /// Remove a gate. Returns the removed callback, if any.
    pub fn remove_gate<M: Into<MethodToken>>(&mut self, method: M, path: &str) -> Option<Callback> {
        self.tree.remove(Table::Gates, path, &method.into())
    }

    /// Register an error handler at `path`. It is offered any failure
    /// that occurs at or below `path`; returning [`DispatchError::Bubble`]
    /// declines and defers to the next handler up the tree.
    pub fn add_error<M, F>(&mut self, method: M, path: &str, error_handler: F)
    where
        M: Into<MethodToken>,
        F: Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.tree
            .add(Table::Errors, path, method.into(), std::sync::Arc::new(error_handler));
    }

    /// Remove an error handler. Returns the removed callback, if any.
    pub fn remove_error<M: Into<MethodToken>>(
        &mut self,
        method: M,
        path: &str,
    ) -> Option<Callback> {
        self.tree.remove(Table::Errors, path, &method.into())
    }

    /// Route one request, leaving the response fully written on every
    /// exit path. This is the only entry point the transport calls.
    pub fn dispatch(&self, req: &mut Request, res: &mut Response) {
        if let Err(cause) = self.run(req, res) {
            tracing::error!(
                request_id = %req.id(),
                method = %req.method(),
                path = %req.path(),
                public = res.error().unwrap_or("Unhandled error."),
                cause = %cause,
                "No error handler accepted the failure"
            );
            Self::default_error(res);
        }
    }

    fn run(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let segments = PathTree::split(req.path());
        req.node_path.clear();
        req.unused = segments.clone();

        let any = MethodToken::Any;
        let exact = MethodToken::from(req.method());

        // Built incrementally while walking down the tree: lower indexes
        // are closer to the root, higher indexes closer to the leaves.
        let mut error_stack: Vec<Callback> = Vec::new();
        let mut matched: Option<(Callback, usize)> = None;
        let mut gate_rejected = false;

        self.tree.traverse_path(&segments, |_, node, name, depth| {
            if depth > 0 {
                req.node_path.push(name.to_string());
                if !req.unused.is_empty() {
                    req.unused.remove(0);
                }
            }

            // A node's own error handlers join the stack before its
            // gates run, so they can catch those gates' rejections.
            for token in [&any, &exact] {
                if let Some(eh) = node.table(Table::Errors).get(token) {
                    error_stack.push(eh.clone());
                }
            }

            // ANY gates run first so a method-specific gate can override
            // an unconditional one.
            for token in [&any, &exact] {
                let Some(gate) = node.table(Table::Gates).get(token).cloned() else {
                    continue;
                };
                if let Err(cause) = gate(req, res) {
                    // Forget any handler discovered above this node; a
                    // rejection must keep deeper matches from running.
                    matched = None;
                    gate_rejected = true;
                    // The gate may have bound its own public message.
                    if res.error().is_none() {
                        res.set_error("Gate closed.");
                    }
                    res.set_private_error(cause.clone());
                    return match Self::handle_error(&error_stack, cause, req, res) {
                        Ok(()) => Ok(Flow::Stop),
                        Err(original) => Err(original),
                    };
                }
            }

            // Track the deepest handler seen so far, preferring the
            // method-specific entry over ANY at the same node.
            let handlers = node.table(Table::Handlers);
            if let Some(handler) = handlers.get(&exact).or_else(|| handlers.get(&any)) {
                matched = Some((handler.clone(), depth));
            }

            Ok(Flow::Continue)
        })?;

        if gate_rejected {
            // An error handler already absorbed the rejection and wrote
            // the response.
            return Ok(());
        }

        let Some((handler, depth)) = matched else {
            res.set_error("Invalid Path");
            res.set_private_error(DispatchError::InvalidPath);
            return Self::handle_error(&error_stack, DispatchError::InvalidPath, req, res);
        };

        // The handler sees exactly the segments its node consumed; the
        // rest stay available as the unused suffix, even when deeper
        // nodes existed past the match.
        req.node_path = segments[..depth].to_vec();
        req.unused = segments[depth..].to_vec();

        let failure = match handler(req, res) {
            Err(cause) => Some(cause),
            // A handler may attach a public error instead of failing.
            Ok(()) => res
                .error()
                .map(|msg| DispatchError::Handler(msg.to_string())),
        };

        if let Some(cause) = failure {
            if res.error().is_none() {
                res.set_error("Unknown error.");
            }
            res.set_private_error(cause.clone());
            return Self::handle_error(&error_stack, cause, req, res);
        }

        Ok(())
    }

    /// The error-bubbling protocol: offer the failure to each collected
    /// error handler, starting closest to the failure point and moving
    /// toward the root. A handler that returns `Ok` has handled it; one
    /// that returns [`DispatchError::Bubble`] declines. Any other error
    /// from an error handler aborts the protocol. When nothing accepts,
    /// the original failure is re-raised to the caller.
    fn handle_error(
        stack: &[Callback],
        original: DispatchError,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        for error_handler in stack.iter().rev() {
            match error_handler(req, res) {
                Ok(()) => return Ok(()),
                Err(DispatchError::Bubble) => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "Error handler failed; aborting bubbling");
                    break;
                }
            }
        }
        Err(original)
    }

    /// Last line of defense: a fixed response that cannot fail. Called
    /// when no error handler anywhere accepted the failure. Leaves an
    /// already-ended response untouched.
    fn default_error(res: &mut Response) {
        if res.ended() {
            return;
        }
        let body = "Unhandled error.";
        res.clear_body();
        res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        res.write(body.as_bytes());
        res.end();
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn run(dispatcher: &Dispatcher, method: Method, path: &str) -> (Request, Response) {
        let mut req = Request::new(method, path);
        let mut res = Response::new();
        dispatcher.dispatch(&mut req, &mut res);
        (req, res)
    }

    #[test]
    fn handler_sees_consumed_and_unused_segments() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a/b", |req, res| {
            res.send_text(&format!("{:?}|{:?}", req.node_path(), req.unused()));
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b/c");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), br#"["a", "b"]|["c"]"#);
    }

    #[test]
    fn deepest_handler_wins() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/", |_, res| {
            res.send_text("root");
            Ok(())
        });
        d.register(Method::GET, "/a", |_, res| {
            res.send_text("a");
            Ok(())
        });
        d.register(Method::GET, "/a/b", |_, res| {
            res.send_text("b");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert_eq!(res.body(), b"b");
        let (_, res) = run(&d, Method::GET, "/a/zzz");
        assert_eq!(res.body(), b"a");
        let (_, res) = run(&d, Method::GET, "/other");
        assert_eq!(res.body(), b"root");
    }

    #[test]
    fn method_specific_handler_beats_any() {
        let mut d = Dispatcher::new();
        d.register(MethodToken::Any, "/a", |_, res| {
            res.send_text("any");
            Ok(())
        });
        d.register(Method::GET, "/a", |_, res| {
            res.send_text("get");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.body(), b"get");
        let (_, res) = run(&d, Method::POST, "/a");
        assert_eq!(res.body(), b"any");
    }

    #[test]
    fn gate_rejection_prevents_deeper_handler() {
        let handler_ran = Arc::new(AtomicBool::new(false));
        let ran = handler_ran.clone();

        let mut d = Dispatcher::new();
        d.add_gate(MethodToken::Any, "/a", |_, _| {
            Err(DispatchError::GateRejected("denied".into()))
        });
        d.register(Method::GET, "/a/b", move |_, res| {
            ran.store(true, Ordering::SeqCst);
            res.send_text("secret");
            Ok(())
        });
        d.add_error(MethodToken::Any, "/", |_, res| {
            res.set_status(StatusCode::FORBIDDEN);
            let msg = res.error().unwrap_or("Gate closed.").to_string();
            res.send_text(&msg);
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert!(!handler_ran.load(Ordering::SeqCst));
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body(), b"Gate closed.");
        assert!(matches!(
            res.private_error(),
            Some(DispatchError::GateRejected(_))
        ));
    }

    #[test]
    fn gate_rejection_clears_shallower_matched_handler() {
        let root_ran = Arc::new(AtomicBool::new(false));
        let ran = root_ran.clone();

        let mut d = Dispatcher::new();
        // Matched at depth 0, before the gate at "a" is reached.
        d.register(Method::GET, "/", move |_, res| {
            ran.store(true, Ordering::SeqCst);
            res.send_text("root");
            Ok(())
        });
        d.add_gate(MethodToken::Any, "/a", |_, _| {
            Err(DispatchError::GateRejected("no".into()))
        });
        d.add_error(MethodToken::Any, "/", |_, res| {
            res.set_status(StatusCode::FORBIDDEN);
            res.send_text("gated");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert!(!root_ran.load(Ordering::SeqCst));
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body(), b"gated");
    }

    #[test]
    fn gate_can_set_its_own_public_message() {
        let mut d = Dispatcher::new();
        d.add_gate(Method::GET, "/a", |_, res| {
            res.set_error("token expired");
            Err(DispatchError::GateRejected("jwt exp in the past".into()))
        });
        d.register(Method::GET, "/a", |_, res| {
            res.send_text("never");
            Ok(())
        });
        d.add_error(MethodToken::Any, "/", |_, res| {
            let msg = res.error().unwrap_or_default().to_string();
            res.set_status(StatusCode::UNAUTHORIZED);
            res.send_text(&msg);
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.body(), b"token expired");
    }

    #[test]
    fn passing_gate_lets_handler_run() {
        let mut d = Dispatcher::new();
        d.add_gate(MethodToken::Any, "/a", |_, _| Ok(()));
        d.register(Method::GET, "/a/b", |_, res| {
            res.send_text("ok");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert_eq!(res.body(), b"ok");
    }

    #[test]
    fn error_handlers_bubble_leaf_to_root() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut d = Dispatcher::new();
        let o = order.clone();
        d.add_error(MethodToken::Any, "/", move |_, res| {
            o.lock().unwrap().push("root");
            res.set_status(StatusCode::BAD_GATEWAY);
            res.send_text("caught at root");
            Ok(())
        });
        let o = order.clone();
        d.add_error(MethodToken::Any, "/a", move |_, _| {
            o.lock().unwrap().push("a");
            Err(DispatchError::Bubble)
        });
        d.register(Method::GET, "/a/b", |_, _| {
            Err(DispatchError::Handler("handler blew up".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert_eq!(*order.lock().unwrap(), vec!["a", "root"]);
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(res.body(), b"caught at root");
    }

    #[test]
    fn routing_failure_reaches_root_error_handler() {
        let mut d = Dispatcher::new();
        d.add_error(MethodToken::Any, "/", |_, res| {
            let msg = res.error().unwrap_or_default().to_string();
            res.set_status(StatusCode::NOT_FOUND);
            res.send_text(&msg);
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/x/y/z");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body(), b"Invalid Path");
    }

    #[test]
    fn root_handler_matches_unregistered_deep_paths() {
        let mut d = Dispatcher::new();
        d.register(MethodToken::Any, "/", |req, res| {
            res.send_text(&req.unused().join("/"));
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/x/y/z");
        assert_eq!(res.body(), b"x/y/z");
    }

    #[test]
    fn unhandled_failure_yields_fixed_fallback() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, _| {
            Err(DispatchError::Handler("nobody catches this".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), b"Unhandled error.");
        assert!(res.ended());
    }

    #[test]
    fn fallback_preserves_already_ended_response() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, res| {
            res.set_status(StatusCode::ACCEPTED);
            res.send_text("partial");
            Err(DispatchError::Handler("failed after ending".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(res.body(), b"partial");
    }

    #[test]
    fn declining_error_handlers_exhaust_to_fallback() {
        let mut d = Dispatcher::new();
        d.add_error(MethodToken::Any, "/", |_, _| Err(DispatchError::Bubble));
        d.register(Method::GET, "/a", |_, _| {
            Err(DispatchError::Handler("still unhandled".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), b"Unhandled error.");
    }

    #[test]
    fn failing_error_handler_aborts_bubbling() {
        let root_ran = Arc::new(AtomicBool::new(false));
        let ran = root_ran.clone();

        let mut d = Dispatcher::new();
        d.add_error(MethodToken::Any, "/", move |_, _| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        });
        d.add_error(MethodToken::Any, "/a", |_, _| {
            Err(DispatchError::Handler("error handler itself broke".into()))
        });
        d.register(Method::GET, "/a", |_, _| {
            Err(DispatchError::Handler("original".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a");
        // The root handler is never offered the error once a non-bubble
        // failure aborts the protocol.
        assert!(!root_ran.load(Ordering::SeqCst));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn handler_setting_public_error_without_failing_triggers_bubbling() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, res| {
            res.set_error("soft failure");
            Ok(())
        });
        d.add_error(MethodToken::Any, "/", |_, res| {
            let msg = res.error().unwrap_or_default().to_string();
            res.set_status(StatusCode::SERVICE_UNAVAILABLE);
            res.send_text(&msg);
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a");
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.body(), b"soft failure");
    }

    #[test]
    fn error_stack_covers_nodes_below_the_match() {
        // The stack is accumulated over the full traversal, so an error
        // handler registered deeper than the matched handler still gets
        // first refusal.
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, _| {
            Err(DispatchError::Handler("fail at a".into()))
        });
        d.add_error(MethodToken::Any, "/a/b", |_, res| {
            res.set_status(StatusCode::IM_A_TEAPOT);
            res.send_text("caught below the match");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(res.body(), b"caught below the match");
    }

    #[test]
    fn method_specific_error_handler_tried_before_any_at_same_node() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut d = Dispatcher::new();
        let o = order.clone();
        d.add_error(MethodToken::Any, "/a", move |_, _| {
            o.lock().unwrap().push("any");
            Err(DispatchError::Bubble)
        });
        let o = order.clone();
        d.add_error(Method::GET, "/a", move |_, res| {
            o.lock().unwrap().push("get");
            res.send_text("handled");
            Ok(())
        });
        d.register(Method::GET, "/a", |_, _| {
            Err(DispatchError::Handler("boom".into()))
        });

        let (_, res) = run(&d, Method::GET, "/a");
        // ANY is pushed first, method-specific second; the stack is
        // walked from its tail, so the method-specific handler goes
        // first.
        assert_eq!(*order.lock().unwrap(), vec!["get"]);
        assert_eq!(res.body(), b"handled");
    }

    #[test]
    fn gate_rejection_uses_stack_accumulated_so_far() {
        let deeper_ran = Arc::new(AtomicBool::new(false));
        let ran = deeper_ran.clone();

        let mut d = Dispatcher::new();
        d.add_gate(MethodToken::Any, "/a", |_, _| {
            Err(DispatchError::GateRejected("no".into()))
        });
        // Registered below the rejecting gate: traversal stops at "a",
        // so this error handler is never collected.
        d.add_error(MethodToken::Any, "/a/b", move |_, res| {
            ran.store(true, Ordering::SeqCst);
            res.send_text("too deep");
            Ok(())
        });
        d.register(Method::GET, "/a/b", |_, res| {
            res.send_text("never");
            Ok(())
        });

        let (_, res) = run(&d, Method::GET, "/a/b");
        assert!(!deeper_ran.load(Ordering::SeqCst));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), b"Unhandled error.");
    }

    #[test]
    fn unregister_returns_none_for_missing_entries() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, res| {
            res.send_text("a");
            Ok(())
        });

        assert!(d.unregister(Method::GET, "/missing").is_none());
        assert!(d.unregister(Method::PUT, "/a").is_none());
        assert!(d.unregister(Method::GET, "/a").is_some());
        assert!(d.unregister(Method::GET, "/a").is_none());
    }

    #[test]
    fn removal_prunes_route_back_to_nearest_ancestor() {
        let mut d = Dispatcher::new();
        d.register(Method::GET, "/a", |_, res| {
            res.send_text("a");
            Ok(())
        });
        d.register(Method::GET, "/a/gcTest", |_, res| {
            res.send_text("gcTest");
            Ok(())
        });

        d.unregister(Method::GET, "/a/gcTest");

        let found = d.tree().lookup(&PathTree::split("/a/gcTest"));
        assert_eq!(found.path, vec!["a"]);
        assert_eq!(found.unused, vec!["gcTest"]);

        // Dispatch now falls back to the surviving ancestor.
        let (_, res) = run(&d, Method::GET, "/a/gcTest");
        assert_eq!(res.body(), b"a");
    }
}
