//! Played-position history.
//!
//! The history serves three masters: repetition counting for the draw
//! rules, the last-K-position fingerprint keying the evaluation cache,
//! and the position stack the encoder folds into network input planes.
//! Each worker keeps its own copy and trims/appends it while descending,
//! so none of this needs locking.

use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{Chess, Color, EnPassantMode, Move, Position};

#[derive(Debug, Clone)]
struct HistoryEntry {
    pos: Chess,
    hash: u64,
    /// How many earlier positions in the reversible window equal this one.
    repetitions: u32,
}

impl HistoryEntry {
    fn new(pos: Chess, repetitions: u32) -> Self {
        let hash = pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
        Self {
            pos,
            hash,
            repetitions,
        }
    }
}

/// Ordered sequence of positions from the game start (or the position
/// command's FEN) up to and including the node currently being examined.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    entries: Vec<HistoryEntry>,
}

impl PositionHistory {
    /// History holding only the standard starting position.
    pub fn starting() -> Self {
        Self::new(Chess::default())
    }

    /// History holding only `pos`.
    pub fn new(pos: Chess) -> Self {
        Self {
            entries: vec![HistoryEntry::new(pos, 0)],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent position.
    #[inline]
    pub fn last(&self) -> &Chess {
        &self.entries.last().expect("history is never empty").pos
    }

    /// Position `back` plies before the last one, if recorded.
    pub fn nth_last(&self, back: usize) -> Option<&Chess> {
        let len = self.entries.len();
        if back < len {
            Some(&self.entries[len - 1 - back].pos)
        } else {
            None
        }
    }

    /// Play `m` on the last position and push the result.
    pub fn append(&mut self, m: &Move) {
        let mut pos = self.last().clone();
        pos.play_unchecked(m);
        let hash = pos.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0;
        // A repetition can only occur within the window since the last
        // irreversible move, which is exactly the halfmove clock.
        let window = (pos.halfmoves() as usize).min(self.entries.len());
        let mut repetitions = 0;
        for entry in self.entries.iter().rev().take(window) {
            if entry.hash == hash {
                repetitions = entry.repetitions + 1;
                break;
            }
        }
        self.entries.push(HistoryEntry {
            pos,
            hash,
            repetitions,
        });
    }

    /// Drop the most recent position.
    pub fn pop(&mut self) {
        debug_assert!(self.entries.len() > 1);
        self.entries.pop();
    }

    /// Shrink back to `len` positions (a worker resetting to the played
    /// history before a new descent).
    pub fn trim(&mut self, len: usize) {
        debug_assert!(len >= 1 && len <= self.entries.len());
        self.entries.truncate(len);
    }

    /// Repetition count of the last position (0 = first occurrence).
    #[inline]
    pub fn repetitions(&self) -> u32 {
        self.entries.last().expect("history is never empty").repetitions
    }

    /// Repetition count of the position `back` plies before the last one.
    pub fn nth_last_repetitions(&self, back: usize) -> Option<u32> {
        let len = self.entries.len();
        if back < len {
            Some(self.entries[len - 1 - back].repetitions)
        } else {
            None
        }
    }

    /// Plies since the last capture or pawn move.
    #[inline]
    pub fn no_capture_no_pawn_ply(&self) -> u32 {
        self.last().halfmoves()
    }

    /// Plies since the start of the game.
    pub fn game_ply(&self) -> u32 {
        let pos = self.last();
        let black = u32::from(pos.turn() == Color::Black);
        (pos.fullmoves().get() - 1) * 2 + black
    }

    #[inline]
    pub fn is_black_to_move(&self) -> bool {
        self.last().turn() == Color::Black
    }

    /// Fingerprint of the last `count` positions, newest first. Order
    /// sensitive, so transpositions that differ only in recent history
    /// key different cache entries.
    pub fn hash_last(&self, count: usize) -> u64 {
        let mut hash: u64 = 0x9e37_79b9_7f4a_7c15;
        for entry in self.entries.iter().rev().take(count.max(1)) {
            hash = hash.rotate_left(13) ^ entry.hash;
            hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::uci::UciMove;

    fn play(history: &mut PositionHistory, moves: &[&str]) {
        for uci in moves {
            let m = uci
                .parse::<UciMove>()
                .unwrap()
                .to_move(history.last())
                .unwrap();
            history.append(&m);
        }
    }

    #[test]
    fn game_ply_counts_half_moves() {
        let mut history = PositionHistory::starting();
        assert_eq!(history.game_ply(), 0);
        assert!(!history.is_black_to_move());
        play(&mut history, &["e2e4"]);
        assert_eq!(history.game_ply(), 1);
        assert!(history.is_black_to_move());
        play(&mut history, &["e7e5", "g1f3"]);
        assert_eq!(history.game_ply(), 3);
    }

    #[test]
    fn knight_shuffle_counts_repetitions() {
        let mut history = PositionHistory::starting();
        play(
            &mut history,
            &["g1f3", "g8f6", "f3g1", "f6g8"],
        );
        // Back to the starting position for the first time.
        assert_eq!(history.repetitions(), 1);
        play(
            &mut history,
            &["g1f3", "g8f6", "f3g1", "f6g8"],
        );
        assert_eq!(history.repetitions(), 2);
    }

    #[test]
    fn pawn_move_resets_the_repetition_window() {
        let mut history = PositionHistory::starting();
        play(
            &mut history,
            &["g1f3", "g8f6", "f3g1", "f6g8", "e2e4"],
        );
        assert_eq!(history.repetitions(), 0);
        assert_eq!(history.no_capture_no_pawn_ply(), 0);
    }

    #[test]
    fn trim_restores_earlier_state() {
        let mut history = PositionHistory::starting();
        play(&mut history, &["e2e4", "e7e5", "g1f3"]);
        let len = history.len();
        let before = history.hash_last(3);
        play(&mut history, &["b8c6"]);
        assert_ne!(history.hash_last(3), before);
        history.trim(len);
        assert_eq!(history.hash_last(3), before);
    }

    #[test]
    fn fingerprint_depends_on_history_depth() {
        let mut a = PositionHistory::starting();
        play(&mut a, &["g1f3", "g8f6", "f3g1", "f6g8"]);
        let b = PositionHistory::starting();
        // Same final position, different paths.
        assert_eq!(a.hash_last(1), b.hash_last(1));
        assert_ne!(a.hash_last(2), b.hash_last(2));
    }
}
