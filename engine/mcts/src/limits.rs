//! Search budgets.
//!
//! `GoParams` carries the raw clock fields of a `go` command; the time
//! manager turns them into an immutable `SearchLimits` for one search.

use shakmaty::Move;

/// Raw parameters of a `go` command. The host parses `searchmoves`
/// against the current position before handing them over.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    pub wtime_ms: Option<u64>,
    pub btime_ms: Option<u64>,
    pub winc_ms: Option<u64>,
    pub binc_ms: Option<u64>,
    pub movestogo: Option<u32>,
    pub movetime_ms: Option<u64>,
    /// `go nodes N`: total visit budget.
    pub nodes: Option<u64>,
    /// Playout budget for this search alone.
    pub playouts: Option<u64>,
    pub infinite: bool,
    pub ponder: bool,
    pub searchmoves: Vec<Move>,
}

/// Immutable per-search budgets. `None` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    pub time_ms: Option<u64>,
    pub visits: Option<u64>,
    pub playouts: Option<u64>,
    pub infinite: bool,
    /// When non-empty, the root considers only these moves.
    pub searchmoves: Vec<Move>,
}

impl SearchLimits {
    /// Budget-free limits for `go infinite`.
    pub fn infinite() -> Self {
        Self {
            infinite: true,
            ..Self::default()
        }
    }

    /// Visit-count budget, the `go nodes N` form.
    pub fn visits(n: u64) -> Self {
        Self {
            visits: Some(n),
            ..Self::default()
        }
    }

    /// Wall-clock budget in milliseconds.
    pub fn movetime(ms: u64) -> Self {
        Self {
            time_ms: Some(ms),
            ..Self::default()
        }
    }

    pub fn with_searchmoves(mut self, moves: Vec<Move>) -> Self {
        self.searchmoves = moves;
        self
    }
}
