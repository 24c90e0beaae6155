//! Progress and result reporting.
//!
//! The search pushes `ThinkingInfo` snapshots through the info callback
//! while running and delivers exactly one `BestMoveInfo` per search
//! through the best-move callback (unless aborted).

use std::sync::Arc;

use shakmaty::uci::UciMove;
use shakmaty::Move;

/// One `info` snapshot.
#[derive(Debug, Clone, Default)]
pub struct ThinkingInfo {
    /// Average playout depth.
    pub depth: u32,
    /// Maximum reached depth.
    pub seldepth: u32,
    /// Time since the search started, in milliseconds.
    pub time_ms: u64,
    /// Visits in the tree, including those carried over by re-rooting.
    pub nodes: u64,
    /// Cache fullness, 0-1000.
    pub hashfull: u32,
    /// Playouts per second.
    pub nps: u64,
    /// Score in centipawns from the side to move's perspective.
    pub score_cp: Option<i32>,
    pub tb_hits: u64,
    /// Principal variation.
    pub pv: Vec<UciMove>,
    /// Free-form line, used by the verbose move stats dump.
    pub comment: Option<String>,
}

/// The final answer of a search.
#[derive(Debug, Clone)]
pub struct BestMoveInfo {
    pub best: Move,
    pub ponder: Option<Move>,
}

pub type InfoCallback = Arc<dyn Fn(&ThinkingInfo) + Send + Sync>;
pub type BestMoveCallback = Arc<dyn Fn(&BestMoveInfo) + Send + Sync>;

/// Map a mean value in [-1, 1] to the centipawn scale GUIs expect.
pub fn q_to_centipawns(q: f64) -> i32 {
    (290.680_623_072 * (1.548_090_806 * q).tan()).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centipawn_conversion_anchors() {
        assert_eq!(q_to_centipawns(0.0), 0);
        // Symmetric around zero.
        assert_eq!(q_to_centipawns(0.5), -q_to_centipawns(-0.5));
        // Monotonic and saturating towards mate scores.
        assert!(q_to_centipawns(0.25) > q_to_centipawns(0.1));
        assert!(q_to_centipawns(0.99) > 5_000);
    }
}
