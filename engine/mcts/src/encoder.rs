//! Network input encoding and policy-head move indexing.
//!
//! Positions are encoded as 112 bitboard planes: 13 planes for each of
//! the last 8 positions (6 of our pieces, 6 of theirs, 1 repetition
//! flag), then castling rights, side to move, the halfmove clock, the
//! game ply and a constant plane. Everything is oriented towards the
//! side to move of the newest position: when black is to move, boards
//! are flipped vertically and colors swapped, and move squares are
//! mirrored the same way for the policy index.

use shakmaty::{CastlingSide, Chess, Color, Move, Position, Role};

use crate::history::PositionHistory;

/// Positions of history folded into the input.
pub const INPUT_HISTORY: usize = 8;
const PLANES_PER_POSITION: usize = 13;
/// Total number of input planes.
pub const INPUT_PLANE_COUNT: usize = INPUT_HISTORY * PLANES_PER_POSITION + 8;

/// Number of entries in the policy head.
pub const POLICY_SIZE: usize = 4096 + 72;

/// One input plane: a bitboard mask scaled by a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputPlane {
    pub mask: u64,
    pub value: f32,
}

impl InputPlane {
    fn full(value: f32) -> Self {
        Self {
            mask: u64::MAX,
            value,
        }
    }

    fn pieces(mask: u64) -> Self {
        Self { mask, value: 1.0 }
    }
}

/// Mirror a square index across the horizontal midline (a1 <-> a8).
#[inline]
fn mirror_square(sq: u16) -> u16 {
    sq ^ 0x38
}

/// Vertical flip of a bitboard (rank 1 <-> rank 8).
#[inline]
fn mirror_mask(mask: u64) -> u64 {
    mask.swap_bytes()
}

fn role_planes(pos: &Chess, color: Color, flip: bool, out: &mut Vec<InputPlane>) {
    const ROLES: [Role; 6] = [
        Role::Pawn,
        Role::Knight,
        Role::Bishop,
        Role::Rook,
        Role::Queen,
        Role::King,
    ];
    let board = pos.board();
    for role in ROLES {
        let mut mask = (board.by_color(color) & board.by_role(role)).0;
        if flip {
            mask = mirror_mask(mask);
        }
        out.push(InputPlane::pieces(mask));
    }
}

/// Encode the last [`INPUT_HISTORY`] positions of `history` as network
/// input planes. Missing history (near the game start) encodes as empty
/// planes.
pub fn encode_position_for_nn(history: &PositionHistory) -> Vec<InputPlane> {
    let us = history.last().turn();
    let them = !us;
    let flip = us == Color::Black;

    let mut planes = Vec::with_capacity(INPUT_PLANE_COUNT);
    for back in 0..INPUT_HISTORY {
        match history.nth_last(back) {
            Some(pos) => {
                role_planes(pos, us, flip, &mut planes);
                role_planes(pos, them, flip, &mut planes);
                let repeated = history.nth_last_repetitions(back).unwrap_or(0) > 0;
                planes.push(if repeated {
                    InputPlane::full(1.0)
                } else {
                    InputPlane::default()
                });
            }
            None => planes.extend([InputPlane::default(); PLANES_PER_POSITION]),
        }
    }

    let pos = history.last();
    let castles = pos.castles();
    for (color, side) in [
        (us, CastlingSide::KingSide),
        (us, CastlingSide::QueenSide),
        (them, CastlingSide::KingSide),
        (them, CastlingSide::QueenSide),
    ] {
        planes.push(if castles.has(color, side) {
            InputPlane::full(1.0)
        } else {
            InputPlane::default()
        });
    }
    planes.push(if flip {
        InputPlane::full(1.0)
    } else {
        InputPlane::default()
    });
    planes.push(InputPlane::full(pos.halfmoves() as f32));
    planes.push(InputPlane::full(history.game_ply() as f32));
    planes.push(InputPlane::full(1.0));

    debug_assert_eq!(planes.len(), INPUT_PLANE_COUNT);
    planes
}

/// Map a move to its policy-head index, from the perspective of the side
/// making it. Normal moves and queen promotions use `from * 64 + to`;
/// underpromotions get a dedicated range keyed by the pawn's file, the
/// capture direction and the chosen piece; castling is encoded as the
/// king's own two-square move.
pub fn move_to_policy_index(m: &Move, flip: bool) -> u16 {
    let (from, to) = match *m {
        Move::Castle { king, rook } => {
            let side = if rook.file() > king.file() {
                CastlingSide::KingSide
            } else {
                CastlingSide::QueenSide
            };
            let to = shakmaty::Square::from_coords(side.king_to_file(), king.rank());
            (king as u16, to as u16)
        }
        _ => (
            m.from().expect("chess moves always have an origin") as u16,
            m.to() as u16,
        ),
    };
    let (from, to) = if flip {
        (mirror_square(from), mirror_square(to))
    } else {
        (from, to)
    };

    match m.promotion() {
        Some(role) if role != Role::Queen => {
            let from_file = from & 7;
            let to_file = to & 7;
            let direction = to_file + 1 - from_file;
            let piece = match role {
                Role::Knight => 0,
                Role::Bishop => 1,
                _ => 2,
            };
            4096 + from_file * 9 + direction * 3 + piece
        }
        _ => from * 64 + to,
    }
}
