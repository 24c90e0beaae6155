//! Search-tree node and edge representation.
//!
//! Each node represents a position reached by a specific move sequence.
//! Statistics are stored in atomics so that threads holding the tree lock
//! in read mode (prefetch, info emission, best-move queries) can read them
//! while another thread mutates them under the write lock.
//!
//! Values are from the side-to-move perspective of the node: `q = +1`
//! means the player to move at this node is winning. Selection therefore
//! scores an edge as `-child.q` from the parent's point of view.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;

use shakmaty::Move;

/// Index into the node arena. Using a newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(u32::MAX);

    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    #[inline]
    pub fn is_some(self) -> bool {
        !self.is_none()
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Proven game outcome, from the perspective of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
    Win,
    Draw,
    Loss,
}

impl GameResult {
    /// The value backed up for this outcome.
    #[inline]
    pub fn value(self) -> f32 {
        match self {
            GameResult::Win => 1.0,
            GameResult::Draw => 0.0,
            GameResult::Loss => -1.0,
        }
    }
}

const TERMINAL_NONE: u8 = 0;
const TERMINAL_WIN: u8 = 1;
const TERMINAL_DRAW: u8 = 2;
const TERMINAL_LOSS: u8 = 3;

/// An outgoing move from a node.
///
/// The prior is quantized to 16 bits on store; normalization of a node's
/// priors runs after quantization so that the stored values sum to one.
/// The child node is spawned lazily on first traversal.
#[derive(Debug)]
pub struct Edge {
    mv: Move,
    p: AtomicU16,
    child: AtomicU32,
}

const P_QUANT: f32 = u16::MAX as f32;

impl Edge {
    pub(crate) fn new(mv: Move) -> Self {
        Self {
            mv,
            p: AtomicU16::new(0),
            child: AtomicU32::new(NodeId::NONE.0),
        }
    }

    #[inline]
    pub fn mv(&self) -> &Move {
        &self.mv
    }

    /// Prior probability, dequantized.
    #[inline]
    pub fn p(&self) -> f32 {
        self.p.load(Ordering::Relaxed) as f32 / P_QUANT
    }

    /// Store a prior, rounding to the 16-bit grid.
    #[inline]
    pub fn set_p(&self, p: f32) {
        let q = (p.clamp(0.0, 1.0) * P_QUANT).round() as u16;
        self.p.store(q, Ordering::Relaxed);
    }

    #[inline]
    pub fn child(&self) -> NodeId {
        NodeId(self.child.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_child(&self, id: NodeId) {
        self.child.store(id.0, Ordering::Release);
    }
}

/// Identifies one edge of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeId {
    pub node: NodeId,
    pub index: usize,
}

/// A node in the search tree.
#[derive(Debug)]
pub struct Node {
    /// Weak back-reference for backup; the arena owns all nodes.
    parent: NodeId,
    /// Completed visits through this node.
    n: AtomicU32,
    /// Workers currently descending through or expanding this node.
    n_in_flight: AtomicU32,
    /// Visit-weighted mean value, side-to-move perspective, f64 bits.
    q: AtomicU64,
    terminal: AtomicU8,
    /// Created once on expansion; length immutable afterwards.
    edges: OnceLock<Box<[Edge]>>,
}

impl Node {
    pub fn new(parent: NodeId) -> Self {
        Self {
            parent,
            n: AtomicU32::new(0),
            n_in_flight: AtomicU32::new(0),
            q: AtomicU64::new(0f64.to_bits()),
            terminal: AtomicU8::new(TERMINAL_NONE),
            edges: OnceLock::new(),
        }
    }

    #[inline]
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    #[inline]
    pub fn n(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    #[inline]
    pub fn n_in_flight(&self) -> u32 {
        self.n_in_flight.load(Ordering::Acquire)
    }

    /// Visits including in-flight ones; this is what the exploration term
    /// divides by, which is what spreads concurrent workers apart.
    #[inline]
    pub fn n_started(&self) -> u32 {
        self.n() + self.n_in_flight()
    }

    #[inline]
    pub fn q(&self) -> f64 {
        f64::from_bits(self.q.load(Ordering::Acquire))
    }

    #[inline]
    fn set_q(&self, q: f64) {
        self.q.store(q.to_bits(), Ordering::Release);
    }

    /// Visits that went into children: every visit except the first one,
    /// which only evaluated this node.
    #[inline]
    pub fn children_visits(&self) -> u32 {
        self.n().saturating_sub(1)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire) != TERMINAL_NONE
    }

    pub fn terminal_result(&self) -> Option<GameResult> {
        match self.terminal.load(Ordering::Acquire) {
            TERMINAL_WIN => Some(GameResult::Win),
            TERMINAL_DRAW => Some(GameResult::Draw),
            TERMINAL_LOSS => Some(GameResult::Loss),
            _ => None,
        }
    }

    /// Mark this node as a proven terminal. Only valid on a node without
    /// children; the result is set at most once.
    pub fn make_terminal(&self, result: GameResult) {
        debug_assert!(!self.has_children());
        let tag = match result {
            GameResult::Win => TERMINAL_WIN,
            GameResult::Draw => TERMINAL_DRAW,
            GameResult::Loss => TERMINAL_LOSS,
        };
        self.set_q(f64::from(result.value()));
        self.terminal.store(tag, Ordering::Release);
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.edges.get().is_some_and(|e| !e.is_empty())
    }

    /// Edges of this node; empty while unexpanded.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        self.edges.get().map_or(&[], |e| &e[..])
    }

    /// Populate the edge list from the legal moves, in move-generation
    /// order. Idempotent under contention: a second caller's list is
    /// dropped, which is fine because both are derived from the same
    /// position.
    pub fn create_edges<I>(&self, moves: I)
    where
        I: IntoIterator<Item = Move>,
    {
        let edges: Box<[Edge]> = moves.into_iter().map(Edge::new).collect();
        let _ = self.edges.set(edges);
    }

    /// Register this worker's descent through the node. Fails when the
    /// node is a leaf already being expanded by another worker, which is
    /// a collision: the caller must abandon the descent.
    pub fn try_start_score_update(&self) -> bool {
        if self.n() == 0 && self.n_in_flight.load(Ordering::Acquire) > 0 {
            return false;
        }
        self.n_in_flight.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Fold a backed-up value into the streaming mean and complete the
    /// visit started by `try_start_score_update`.
    pub fn finalize_score_update(&self, v: f32) {
        let n = self.n() + 1;
        let q = self.q();
        self.set_q(q + (f64::from(v) - q) / f64::from(n));
        self.n.store(n, Ordering::Release);
        self.n_in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Roll back the visit of a collided descent without recording a value.
    pub fn cancel_score_update(&self) {
        self.n_in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Copy of this node with remapped parent, no in-flight visits and
    /// unspawned children. Used when re-rooting extracts a subtree.
    pub(crate) fn clone_detached(&self, parent: NodeId) -> Node {
        let node = Node::new(parent);
        node.n.store(self.n(), Ordering::Relaxed);
        node.q.store(self.q().to_bits(), Ordering::Relaxed);
        node.terminal
            .store(self.terminal.load(Ordering::Relaxed), Ordering::Relaxed);
        if let Some(edges) = self.edges.get() {
            let copies: Box<[Edge]> = edges
                .iter()
                .map(|e| {
                    let copy = Edge::new(e.mv.clone());
                    copy.p.store(e.p.load(Ordering::Relaxed), Ordering::Relaxed);
                    copy
                })
                .collect();
            let _ = node.edges.set(copies);
        }
        node
    }
}
