//! Per-move time budgeting.
//!
//! The per-move budget divides the usable clock by an estimate of how
//! many moves the game still has. That estimate sums a logistic survival
//! function of the ply ("what is the chance the game is still running at
//! ply p"), normalized to the current ply, and is capped by an explicit
//! `movestogo`. Time saved when smart pruning ends a search early is
//! carried in a [`BonusReserve`] and spent on the next move with a real
//! decision, without distorting the slowmover curve.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use engine_options::EngineOptions;
use tracing::debug;

use crate::limits::{GoParams, SearchLimits};

/// Milliseconds saved by smart pruning, carried between searches. Owned
/// by the time manager; the search stores into it when it stops early
/// because the best move cannot change any more.
#[derive(Debug, Default)]
pub struct BonusReserve(AtomicU64);

impl BonusReserve {
    /// Record unused time from a smart-pruned search.
    pub fn store(&self, ms: u64) {
        self.0.store(ms, Ordering::Release);
    }

    /// Claim the carried time, clearing the reserve.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }

    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Turns `go` parameters into per-search limits.
pub struct TimeManager {
    slowmover: f64,
    move_overhead_ms: u64,
    midpoint: f64,
    steepness: f64,
    bonus: Arc<BonusReserve>,
}

/// Below this budget the slowmover multiplier is not applied, so smart
/// pruning keeps something to give back.
const SLOWMOVER_FLOOR_MS: f64 = 200.0;

impl TimeManager {
    pub fn new(options: &EngineOptions) -> Self {
        Self {
            slowmover: f64::from(options.slowmover),
            move_overhead_ms: options.move_overhead_ms,
            midpoint: f64::from(options.time_curve_midpoint),
            steepness: f64::from(options.time_curve_steepness),
            bonus: Arc::new(BonusReserve::default()),
        }
    }

    /// Handle the search stores saved time into.
    pub fn bonus_reserve(&self) -> Arc<BonusReserve> {
        Arc::clone(&self.bonus)
    }

    /// Probability that the game is still in progress at `ply`.
    fn survival(&self, ply: f64) -> f64 {
        1.0 / (1.0 + (ply / self.midpoint).powf(self.steepness))
    }

    /// Compute the limits for one `go` command issued at `ply`.
    pub fn limits(&self, params: &GoParams, ply: u32, black_to_move: bool) -> SearchLimits {
        let mut limits = SearchLimits {
            time_ms: params.movetime_ms,
            visits: params.nodes,
            playouts: params.playouts,
            infinite: params.infinite || params.ponder,
            searchmoves: params.searchmoves.clone(),
        };
        if limits.infinite {
            limits.visits = None;
            return limits;
        }
        let time = if black_to_move {
            params.btime_ms
        } else {
            params.wtime_ms
        };
        let Some(time) = time else {
            return limits;
        };
        let increment = if black_to_move {
            params.binc_ms
        } else {
            params.winc_ms
        }
        .unwrap_or(0);

        // Sum the survival function far enough ahead to approximate the
        // tail, stepping by two because only our own moves need budget.
        let ply = f64::from(ply);
        let mut guessed_movestogo = 0.0;
        let mut p = ply + 2.0;
        while p < ply + 300.0 {
            guessed_movestogo += self.survival(p);
            p += 2.0;
        }
        guessed_movestogo = guessed_movestogo / self.survival(ply) + 1.0;

        let mut movestogo = match params.movestogo {
            Some(0) | None => guessed_movestogo,
            Some(n) => {
                let n = f64::from(n);
                if guessed_movestogo < n {
                    guessed_movestogo
                } else {
                    n
                }
            }
        };
        if movestogo < 1.0 {
            movestogo = 1.0;
        }

        let mut total_moves_time =
            (time as f64 + increment as f64 * (movestogo - 1.0) - self.move_overhead_ms as f64)
                .max(0.0);

        // Budget the curve on natural time only; the carry is added back
        // after the slowmover decision.
        let bonus = self.bonus.take();
        if bonus > 0 {
            debug!(bonus_ms = bonus, "spending carried smart-pruning time");
            total_moves_time -= bonus as f64;
        }

        let mut this_move_time = total_moves_time / movestogo;
        if self.slowmover < 1.0 || this_move_time * self.slowmover > SLOWMOVER_FLOOR_MS {
            this_move_time *= self.slowmover;
        }
        if bonus > 0 {
            this_move_time += bonus as f64;
        }

        let cap = time.saturating_sub(self.move_overhead_ms);
        limits.time_ms = Some((this_move_time.max(0.0) as u64).min(cap));
        limits
    }
}
