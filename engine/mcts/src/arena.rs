//! Arena-backed node storage.
//!
//! All nodes of a tree live in one contiguous `Vec` and are referenced by
//! `NodeId` indices, which keeps traversal cache-friendly and makes
//! dropping a whole tree a single deallocation. The arena is append-only;
//! orphaned subtrees are reclaimed in bulk when re-rooting extracts the
//! surviving subtree into a fresh arena.

use crate::node::{Edge, Node, NodeId};

#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visits of the node behind an edge, zero while unspawned.
    #[inline]
    pub fn edge_n(&self, edge: &Edge) -> u32 {
        let child = edge.child();
        if child.is_none() {
            0
        } else {
            self.get(child).n()
        }
    }

    /// Visits including in-flight, zero while unspawned.
    #[inline]
    pub fn edge_n_started(&self, edge: &Edge) -> u32 {
        let child = edge.child();
        if child.is_none() {
            0
        } else {
            self.get(child).n_started()
        }
    }

    /// Value of the edge from the parent's perspective, or `default`
    /// (the first-play-urgency estimate) while the child is unvisited.
    #[inline]
    pub fn edge_q(&self, edge: &Edge, default: f64) -> f64 {
        let child = edge.child();
        if child.is_none() {
            return default;
        }
        let node = self.get(child);
        if node.n() == 0 {
            default
        } else {
            -node.q()
        }
    }

    /// Exploration term of the PUCT score; `puct_mult` is
    /// `cpuct * sqrt(max(children_visits, 1))` of the parent.
    #[inline]
    pub fn edge_u(&self, edge: &Edge, puct_mult: f64) -> f64 {
        puct_mult * f64::from(edge.p()) / f64::from(1 + self.edge_n_started(edge))
    }

    pub fn edge_is_terminal(&self, edge: &Edge) -> bool {
        let child = edge.child();
        child.is_some() && self.get(child).is_terminal()
    }

    /// Sum of priors of children that have been visited at least once.
    pub fn visited_policy(&self, node: &Node) -> f32 {
        node.edges()
            .iter()
            .filter(|e| self.edge_n(e) > 0)
            .map(|e| e.p())
            .sum()
    }

    /// Child behind `edges()[edge_index]` of `parent`, spawning it if it
    /// does not exist yet. Callers hold the tree write lock.
    pub fn get_or_spawn(&mut self, parent: NodeId, edge_index: usize) -> NodeId {
        let child = self.get(parent).edges()[edge_index].child();
        if child.is_some() {
            return child;
        }
        let id = self.alloc(Node::new(parent));
        self.get(parent).edges()[edge_index].set_child(id);
        id
    }

    /// Copy the subtree under `root` into a fresh arena, preserving
    /// visit counts, values, terminal flags and priors. Everything not
    /// reachable from `root` is dropped with the old arena.
    pub fn extract_subtree(&self, root: NodeId) -> (NodeArena, NodeId) {
        let mut dst = NodeArena::new();
        let new_root = dst.alloc(self.get(root).clone_detached(NodeId::NONE));
        let mut stack = vec![(root, new_root)];
        while let Some((old_id, new_id)) = stack.pop() {
            let old = self.get(old_id);
            for (index, edge) in old.edges().iter().enumerate() {
                let old_child = edge.child();
                if old_child.is_none() {
                    continue;
                }
                let new_child = dst.alloc(self.get(old_child).clone_detached(new_id));
                dst.get(new_id).edges()[index].set_child(new_child);
                stack.push((old_child, new_child));
            }
        }
        (dst, new_root)
    }
}
