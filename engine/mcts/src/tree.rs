//! The game tree: root node, played history, and re-rooting.
//!
//! The tree persists across searches within a game. Its `RwLock` is the
//! nodes mutex of the whole search: it guards the arena, the topology
//! and the per-search aggregates that need cross-node consistency (best
//! root edge, playout counters). Lock order when both are held is this
//! lock first, then the search's counters mutex.

use std::sync::{Arc, RwLock};

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Position};
use thiserror::Error;
use tracing::debug;

use crate::arena::NodeArena;
use crate::history::PositionHistory;
use crate::node::{EdgeId, Node, NodeId};

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid FEN '{0}'")]
    InvalidFen(String),
    #[error("illegal move '{0}' in move list")]
    IllegalMove(String),
}

/// Aggregates of the running search, guarded by the tree lock.
#[derive(Debug, Default)]
pub(crate) struct SearchStats {
    pub best_move_edge: Option<EdgeId>,
    pub last_outputted_edge: Option<EdgeId>,
    pub total_playouts: u64,
    pub cum_depth: u64,
    pub max_depth: u32,
    /// Smart-pruning estimate of playouts still affordable.
    pub remaining_playouts: u64,
    pub last_info_depth: u32,
    pub last_info_seldepth: u32,
    pub last_info_time_ms: u64,
}

impl SearchStats {
    pub fn reset() -> Self {
        Self {
            remaining_playouts: u64::MAX,
            ..Self::default()
        }
    }

    pub fn average_depth(&self) -> u32 {
        (self.cum_depth / self.total_playouts.max(1)) as u32
    }
}

/// Everything behind the nodes lock.
#[derive(Debug)]
pub(crate) struct TreeState {
    pub arena: NodeArena,
    pub root: NodeId,
    pub stats: SearchStats,
}

impl TreeState {
    fn fresh() -> Self {
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::new(NodeId::NONE));
        Self {
            arena,
            root,
            stats: SearchStats::reset(),
        }
    }
}

/// Owns the search tree and the history of played positions.
pub struct Tree {
    shared: Arc<RwLock<TreeState>>,
    history: PositionHistory,
    start_fen: String,
    /// Moves from `start_fen` to the current root.
    played: Vec<UciMove>,
}

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Fresh tree at the standard starting position.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RwLock::new(TreeState::fresh())),
            history: PositionHistory::starting(),
            start_fen: STARTING_FEN.to_string(),
            played: Vec::new(),
        }
    }

    /// Re-play a position command. When the new move list extends the
    /// line the tree is already rooted on, the root advances onto the
    /// matching child and that subtree's statistics survive; any
    /// mismatch or shrinkage rebuilds from scratch.
    pub fn reset_to_position(&mut self, fen: &str, moves: &[UciMove]) -> Result<(), TreeError> {
        let setup: Fen = fen
            .parse()
            .map_err(|_| TreeError::InvalidFen(fen.to_string()))?;
        let start: Chess = setup
            .into_position(CastlingMode::Standard)
            .map_err(|_| TreeError::InvalidFen(fen.to_string()))?;

        let mut history = PositionHistory::new(start);
        let mut parsed = Vec::with_capacity(moves.len());
        for uci in moves {
            let m = uci
                .to_move(history.last())
                .map_err(|_| TreeError::IllegalMove(uci.to_string()))?;
            history.append(&m);
            parsed.push(m);
        }

        let extends_current_line = fen == self.start_fen
            && moves.len() >= self.played.len()
            && moves[..self.played.len()] == self.played[..];

        let mut reused = false;
        if extends_current_line {
            let state = self.shared.read().expect("tree lock poisoned");
            let mut head = state.root;
            let mut alive = true;
            for m in &parsed[self.played.len()..] {
                let node = state.arena.get(head);
                let child = node
                    .edges()
                    .iter()
                    .find(|e| e.mv() == m)
                    .map(|e| e.child());
                match child {
                    Some(id) if id.is_some() && state.arena.get(id).n() > 0 => head = id,
                    _ => {
                        alive = false;
                        break;
                    }
                }
            }
            if alive {
                let (arena, root) = state.arena.extract_subtree(head);
                let preserved = arena.get(root).n();
                drop(state);
                let mut state = self.shared.write().expect("tree lock poisoned");
                *state = TreeState {
                    arena,
                    root,
                    stats: SearchStats::reset(),
                };
                debug!(visits = preserved, "re-rooted onto played move");
                reused = true;
            }
        }
        if !reused {
            let mut state = self.shared.write().expect("tree lock poisoned");
            *state = TreeState::fresh();
            debug!("rebuilt tree from scratch");
        }

        self.history = history;
        self.start_fen = fen.to_string();
        self.played = moves.to_vec();
        Ok(())
    }

    /// Id of the node the next search starts from.
    pub fn current_head(&self) -> NodeId {
        self.shared.read().expect("tree lock poisoned").root
    }

    /// Positions from the game start up to the root.
    pub fn position_history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn ply_count(&self) -> u32 {
        self.history.game_ply()
    }

    pub fn is_black_to_move(&self) -> bool {
        self.history.is_black_to_move()
    }

    /// Visits accumulated on the current root.
    pub fn root_visits(&self) -> u32 {
        let state = self.shared.read().expect("tree lock poisoned");
        state.arena.get(state.root).n()
    }

    pub(crate) fn shared(&self) -> Arc<RwLock<TreeState>> {
        Arc::clone(&self.shared)
    }
}
