//! The path tree: an explicit tree of nodes traversed per request.
//!
//! # Responsibilities
//! - Store handlers, gates, and error handlers per path segment
//! - Create nodes lazily on registration, prune them on removal
//! - Traverse a request path, visiting every ancestor on the way down
//! - Bubble from a node toward the root
//!
//! # Design Decisions
//! - Explicit tree instead of regex routes: hierarchy is the point.
//!   A gate or error handler on a node is guaranteed to apply to the
//!   whole subtree below it, and longest-prefix matching falls out of
//!   a single traversal
//! - Arena storage: nodes live in a slab addressed by `NodeId`, parents
//!   are stored as indices, so there are no ownership cycles and
//!   bubbling is O(1) per step
//! - `IndexMap` everywhere: children and callback tables keep their
//!   insertion order, which keeps traversal and rendering deterministic

use std::sync::Arc;

use indexmap::IndexMap;

use crate::http::{Request, Response};
use crate::routing::error::DispatchError;
use crate::routing::method::MethodToken;

/// Stable handle to a node in the tree's arena.
pub type NodeId = usize;

/// Callback stored in a node table. Handlers, gates, and error handlers
/// all share this shape; they differ only in when the dispatcher calls
/// them and how it interprets the result.
pub type Callback =
    Arc<dyn Fn(&mut Request, &mut Response) -> Result<(), DispatchError> + Send + Sync>;

/// The three per-node registration tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Handlers,
    Gates,
    Errors,
}

/// What a traversal visitor wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep walking.
    Continue,
    /// Stop cleanly. Not a failure; the traversal returns normally.
    Stop,
}

/// Result of a [`PathTree::lookup`].
#[derive(Debug)]
pub struct Lookup {
    /// Deepest node reached.
    pub node: NodeId,
    /// Path segments actually consumed (excludes the synthetic root).
    pub path: Vec<String>,
    /// Remaining suffix of the requested path, when it could not be
    /// fully resolved. Empty otherwise.
    pub unused: Vec<String>,
}

/// One node in the tree.
pub struct Node {
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
    handlers: IndexMap<MethodToken, Callback>,
    gates: IndexMap<MethodToken, Callback>,
    errors: IndexMap<MethodToken, Callback>,
}

impl Node {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            children: IndexMap::new(),
            handlers: IndexMap::new(),
            gates: IndexMap::new(),
            errors: IndexMap::new(),
        }
    }

    /// Parent handle, `None` at the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// One of the three registration tables.
    pub fn table(&self, table: Table) -> &IndexMap<MethodToken, Callback> {
        match table {
            Table::Handlers => &self.handlers,
            Table::Gates => &self.gates,
            Table::Errors => &self.errors,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut IndexMap<MethodToken, Callback> {
        match table {
            Table::Handlers => &mut self.handlers,
            Table::Gates => &mut self.gates,
            Table::Errors => &mut self.errors,
        }
    }

    fn tables_empty(&self) -> bool {
        self.handlers.is_empty() && self.gates.is_empty() && self.errors.is_empty()
    }
}

/// Arena-backed path tree.
///
/// The root always exists and is never pruned. All other nodes are
/// created lazily by [`ensure`](PathTree::ensure) and destroyed only by
/// [`gc`](PathTree::gc) after a registration is removed.
pub struct PathTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

const ROOT: NodeId = 0;

impl PathTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new(None))],
            free: Vec::new(),
        }
    }

    /// Turn an HTTP path into a list of node names.
    ///
    /// Splits on one-or-more separators; empty segments are discarded,
    /// so `"/a//b/"` and `"a/b"` both yield `["a", "b"]`.
    pub fn split(path: &str) -> Vec<String> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Root node handle.
    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// Borrow a node. The handle must be live; the tree only hands out
    /// live handles and never reuses one while it is reachable.
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("stale node handle")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("stale node handle")
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    /// Child segment names of a node, in insertion order. Mostly for
    /// debugging.
    pub fn child_names(&self, id: NodeId) -> Vec<String> {
        self.node(id).children.keys().cloned().collect()
    }

    /// Guarantee that a node exists at `path`, creating any missing
    /// intermediate children. Never fails.
    ///
    /// Creating a node is usually paired with adding a handler, gate,
    /// or error handler; a contentless node is removed by the next
    /// [`gc`](PathTree::gc).
    pub fn ensure(&mut self, path: &str) -> NodeId {
        let mut cur = ROOT;
        for name in Self::split(path) {
            let existing = self.node(cur).children.get(&name).copied();
            cur = match existing {
                Some(child) => child,
                None => {
                    let child = self.alloc(Node::new(Some(cur)));
                    self.node_mut(cur).children.insert(name, child);
                    child
                }
            };
        }
        cur
    }

    /// Register a callback at `path`, replacing any prior entry for the
    /// same method token in the same table.
    pub fn add(&mut self, table: Table, path: &str, method: MethodToken, callback: Callback) {
        let node = self.ensure(path);
        self.node_mut(node).table_mut(table).insert(method, callback);
    }

    /// Remove a callback. Returns the removed callback, or `None` when
    /// `path` does not resolve to an existing node or the entry does
    /// not exist. Prunes contentless nodes afterwards.
    pub fn remove(
        &mut self,
        table: Table,
        path: &str,
        method: &MethodToken,
    ) -> Option<Callback> {
        let segments = Self::split(path);
        let mut deepest = ROOT;
        let mut consumed = 0usize;
        let walked: Result<usize, DispatchError> =
            self.traverse_path(&segments, |id, _, _, depth| {
                deepest = id;
                consumed = depth;
                Ok(Flow::Continue)
            });
        debug_assert!(walked.is_ok());
        if consumed != segments.len() {
            return None;
        }
        let removed = self
            .node_mut(deepest)
            .table_mut(table)
            .shift_remove(method);
        self.gc();
        removed
    }

    /// Walk from the root along `path`, invoking `visit` on every node
    /// reached, starting with the root itself at depth 0 under the name
    /// `"ROOT"`.
    ///
    /// Stops when the path is exhausted (the final node is visited
    /// too), when a required child does not exist, or when `visit`
    /// returns [`Flow::Stop`]. A genuine error from `visit` aborts the
    /// traversal and propagates unchanged. Returns the number of nodes
    /// visited.
    pub fn traverse_path<F>(&self, path: &[String], mut visit: F) -> Result<usize, DispatchError>
    where
        F: FnMut(NodeId, &Node, &str, usize) -> Result<Flow, DispatchError>,
    {
        let mut cur = ROOT;
        let mut name = "ROOT";
        let mut count = 0usize;
        for depth in 0..=path.len() {
            let flow = visit(cur, self.node(cur), name, depth)?;
            count += 1;
            if flow == Flow::Stop {
                break;
            }
            if depth < path.len() {
                name = &path[depth];
                match self.node(cur).children.get(name).copied() {
                    Some(child) => cur = child,
                    None => break,
                }
            }
        }
        Ok(count)
    }

    /// Find the closest matching node for `path`.
    ///
    /// Looking up `["a", "b", "c", "d"]` in a tree that only contains a
    /// node at `["a", "b"]` yields the `b` node, `path = ["a", "b"]`,
    /// and `unused = ["c", "d"]`.
    pub fn lookup(&self, path: &[String]) -> Lookup {
        let mut result = Lookup {
            node: ROOT,
            path: Vec::new(),
            unused: Vec::new(),
        };
        let walked = self.traverse_path(path, |id, _, name, depth| {
            result.node = id;
            if depth > 0 {
                result.path.push(name.to_string());
            }
            Ok(Flow::Continue)
        });
        debug_assert!(walked.is_ok());
        if result.path.len() != path.len() {
            result.unused = path[result.path.len()..].to_vec();
        }
        result
    }

    /// Walk upward from `start` toward the root, invoking `fn` on each
    /// node along the way. The loop stops once the current node has no
    /// parent, so `f` is never invoked on the root itself, or when `f`
    /// returns [`Flow::Stop`].
    pub fn bubble<F>(&self, start: NodeId, mut f: F) -> Result<(), DispatchError>
    where
        F: FnMut(NodeId, &Node) -> Result<Flow, DispatchError>,
    {
        let mut cur = start;
        while let Some(parent) = self.node(cur).parent {
            if f(cur, self.node(cur))? == Flow::Stop {
                break;
            }
            cur = parent;
        }
        Ok(())
    }

    /// Prune unused nodes. A node is unused when its three tables are
    /// empty and no descendant was kept. The root is never pruned.
    pub fn gc(&mut self) {
        self.gc_node(ROOT);
    }

    fn gc_node(&mut self, id: NodeId) -> bool {
        let children: Vec<(String, NodeId)> = self
            .node(id)
            .children
            .iter()
            .map(|(name, child)| (name.clone(), *child))
            .collect();
        let mut kept_child = false;
        for (name, child) in children {
            let keep = self.gc_node(child);
            if !keep && self.node(child).tables_empty() {
                // All of the child's own children were already pruned.
                self.node_mut(id).children.shift_remove(&name);
                self.release(child);
            } else {
                kept_child = true;
            }
        }
        kept_child || !self.node(id).tables_empty()
    }

    /// Full pre/post-order walk of the tree. `f` receives the node, its
    /// segment name (`"ROOT"` at the root), its depth, and whether this
    /// is the pre- or post-order visit.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(NodeId, &Node, &str, usize, WalkOrder),
    {
        self.walk_node(ROOT, "ROOT", 0, &mut f);
    }

    fn walk_node<F>(&self, id: NodeId, name: &str, level: usize, f: &mut F)
    where
        F: FnMut(NodeId, &Node, &str, usize, WalkOrder),
    {
        f(id, self.node(id), name, level, WalkOrder::Pre);
        let children: Vec<(String, NodeId)> = self
            .node(id)
            .children
            .iter()
            .map(|(n, c)| (n.clone(), *c))
            .collect();
        for (child_name, child) in children {
            self.walk_node(child, &child_name, level + 1, f);
        }
        f(id, self.node(id), name, level, WalkOrder::Post);
    }

    /// One-line-per-node description of the tree for troubleshooting.
    /// `[G]`/`[E]` mark nodes with gates or error handlers; the arrow
    /// lists the methods each node handles.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.walk(|_, node, name, level, order| {
            if order != WalkOrder::Pre {
                return;
            }
            let mut marks = Vec::new();
            if !node.gates.is_empty() {
                marks.push("G");
            }
            if !node.errors.is_empty() {
                marks.push("E");
            }
            let marks = if marks.is_empty() {
                " ".to_string()
            } else {
                format!(" [{}] ", marks.join(","))
            };
            let methods: Vec<String> = node.handlers.keys().map(|m| m.to_string()).collect();
            lines.push(format!(
                "{}{}{}-> {}",
                "  ".repeat(level),
                name,
                marks,
                methods.join(",")
            ));
        });
        lines.join("\n")
    }
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Visit order for [`PathTree::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    Pre,
    Post,
}
