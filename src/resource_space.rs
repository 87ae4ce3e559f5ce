//! The server's routing tree. Grounded on the anonymous `ResourceSpace`
//! struct and `Server::RegisterResource`/
//! `Server::Impl::DataReceived`'s routing walk in the original
//! `Server.cpp`. The original models parent/child links with
//! `shared_ptr`/`weak_ptr`; this crate uses a flat arena of nodes indexed
//! by `usize` instead, since the resource space as a whole already lives
//! behind the server's own lock and doesn't need its own reference
//! counting.

use std::collections::HashMap;
use std::sync::Arc;

use crate::request::Request;
use crate::response::Response;

pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

const ROOT: usize = 0;

struct Node {
    name: String,
    parent: Option<usize>,
    handler: Option<Handler>,
    children: HashMap<String, usize>,
}

/// A token returned by `register`, redeemed by `unregister` to remove the
/// leaf and collapse any ancestor chain left childless by the removal.
#[derive(Debug, Clone, Copy)]
pub struct Registration(usize);

pub struct ResourceSpace {
    nodes: Vec<Option<Node>>,
}

impl Default for ResourceSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSpace {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                name: String::new(),
                parent: None,
                handler: None,
                children: HashMap::new(),
            })],
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("live node index")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("live node index")
    }

    /// Registers `handler` at the exact path `segments`. Fails (returns
    /// `None`) if a handler already sits at any prefix of the path, or if
    /// the target node already has children — a node is either a handler
    /// leaf or an internal branch, never both.
    pub fn register(&mut self, segments: &[String], handler: Handler) -> Option<Registration> {
        let mut current = ROOT;
        for segment in segments {
            if self.node(current).handler.is_some() {
                return None;
            }
            if let Some(&child) = self.node(current).children.get(segment) {
                current = child;
            } else {
                let idx = self.nodes.len();
                self.nodes.push(Some(Node {
                    name: segment.clone(),
                    parent: Some(current),
                    handler: None,
                    children: HashMap::new(),
                }));
                self.node_mut(current).children.insert(segment.clone(), idx);
                current = idx;
            }
        }
        let node = self.node(current);
        if node.handler.is_some() || !node.children.is_empty() {
            return None;
        }
        self.node_mut(current).handler = Some(handler);
        Some(Registration(current))
    }

    /// Removes the handler registered by `register` and collapses the
    /// chain of now-childless ancestors up to the first ancestor still
    /// holding siblings, or to the root (which is cleared, not freed).
    pub fn unregister(&mut self, registration: Registration) {
        let mut idx = registration.0;
        self.node_mut(idx).handler = None;
        loop {
            let is_empty = {
                let n = self.node(idx);
                n.handler.is_none() && n.children.is_empty()
            };
            if idx == ROOT || !is_empty {
                break;
            }
            let parent = self.node(idx).parent.expect("non-root has a parent");
            let name = self.node(idx).name.clone();
            self.node_mut(parent).children.remove(&name);
            self.nodes[idx] = None;
            idx = parent;
        }
    }

    /// Walks `path` one subspace at a time, stopping at the first segment
    /// with no matching child (or when `path` is exhausted), then resolves
    /// a handler at whatever node that walk ended on. Returns the handler
    /// plus the unconsumed suffix of `path`, which becomes the request's
    /// residual target path.
    pub fn lookup(&self, path: &[String]) -> Option<(Handler, Vec<String>)> {
        let mut current = ROOT;
        let mut consumed = 0;
        while consumed < path.len() {
            match self.node(current).children.get(&path[consumed]) {
                Some(&child) => {
                    current = child;
                    consumed += 1;
                }
                None => break,
            }
        }
        self.node(current)
            .handler
            .clone()
            .map(|h| (h, path[consumed..].to_vec()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::response::State as ResponseState;

    fn segs(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    fn canned(body: &'static str) -> Handler {
        Arc::new(move |_req: &Request| {
            let mut resp = Response::new();
            resp.status_code = 200;
            resp.body = body.as_bytes().to_vec();
            resp.state = ResponseState::Complete;
            resp
        })
    }

    #[test]
    fn registers_and_routes_with_residual_path() {
        let mut space = ResourceSpace::new();
        space.register(&segs(&["a", "b"]), canned("ab")).unwrap();
        let (handler, residual) = space.lookup(&segs(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(residual, segs(&["c", "d"]));
        let resp = handler(&Request::new());
        assert_eq!(resp.body, b"ab");
    }

    #[test]
    fn conflicting_registration_under_existing_handler_is_rejected() {
        let mut space = ResourceSpace::new();
        space.register(&segs(&["a"]), canned("a")).unwrap();
        assert!(space.register(&segs(&["a", "b"]), canned("ab")).is_none());
    }

    #[test]
    fn conflicting_registration_over_existing_children_is_rejected() {
        let mut space = ResourceSpace::new();
        space.register(&segs(&["a", "b"]), canned("ab")).unwrap();
        assert!(space.register(&segs(&["a"]), canned("a")).is_none());
    }

    #[test]
    fn unregister_collapses_childless_ancestors() {
        let mut space = ResourceSpace::new();
        let reg = space.register(&segs(&["a", "b", "c"]), canned("abc")).unwrap();
        space.unregister(reg);
        assert!(space.lookup(&segs(&["a", "b", "c"])).is_none());
        // The path is free again for a fresh registration.
        assert!(space.register(&segs(&["a", "b", "c"]), canned("abc2")).is_some());
    }

    #[test]
    fn unregister_stops_collapsing_at_a_sibling() {
        let mut space = ResourceSpace::new();
        space.register(&segs(&["a", "b"]), canned("ab")).unwrap();
        let reg_c = space.register(&segs(&["a", "c"]), canned("ac")).unwrap();
        space.unregister(reg_c);
        // "a/b" is still reachable; "a" was not collapsed away.
        assert!(space.lookup(&segs(&["a", "b"])).is_some());
    }

    #[test]
    fn unmatched_path_misses() {
        let space = ResourceSpace::new();
        assert!(space.lookup(&segs(&["nope"])).is_none());
    }

    #[test]
    fn empty_path_registers_at_the_root() {
        let mut space = ResourceSpace::new();
        space.register(&[], canned("root")).unwrap();
        let (handler, residual) = space.lookup(&segs(&[])).unwrap();
        assert!(residual.is_empty());
        assert_eq!(handler(&Request::new()).body, b"root");
    }
}
