//! Endgame tablebase probing.
//!
//! The search only needs WDL verdicts for positions with a zeroed
//! halfmove clock and no castling rights, so the prober interface is a
//! two-method trait; the Syzygy adapter below implements it over
//! `shakmaty-syzygy`. A failed load disables tablebases rather than the
//! engine: the caller keeps `None` and the search runs without probes.

use shakmaty::Chess;
use shakmaty_syzygy::Tablebase;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TablebaseError {
    #[error("tablebase load failed: {0}")]
    Load(String),
    #[error("tablebase probe failed: {0}")]
    Probe(String),
}

/// Win/draw/loss verdict from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wdl {
    Loss,
    BlessedLoss,
    Draw,
    CursedWin,
    Win,
}

/// Capability set the search needs from an endgame oracle.
pub trait TablebaseProber: Send + Sync {
    /// Largest piece count covered by the loaded tables.
    fn max_cardinality(&self) -> usize;

    /// Probe the WDL verdict for a position. Callers guarantee the
    /// halfmove clock is zero and no castling rights remain.
    fn probe_wdl(&self, pos: &Chess) -> Result<Wdl, TablebaseError>;
}

/// Syzygy tablebases loaded from one or more directories.
pub struct SyzygyTablebase {
    inner: Tablebase<Chess>,
}

impl SyzygyTablebase {
    /// Load tables from a colon-separated directory list.
    pub fn load(paths: &str) -> Result<Self, TablebaseError> {
        let mut inner = Tablebase::new();
        for dir in paths.split(':').filter(|p| !p.is_empty()) {
            match inner.add_directory(dir) {
                Ok(count) => info!(dir, files = count, "loaded syzygy tablebase directory"),
                Err(err) => {
                    warn!(dir, %err, "failed to load syzygy tablebase directory");
                    return Err(TablebaseError::Load(format!("{dir}: {err}")));
                }
            }
        }
        Ok(Self { inner })
    }
}

impl TablebaseProber for SyzygyTablebase {
    fn max_cardinality(&self) -> usize {
        self.inner.max_pieces()
    }

    fn probe_wdl(&self, pos: &Chess) -> Result<Wdl, TablebaseError> {
        let wdl = self
            .inner
            .probe_wdl_after_zeroing(pos)
            .map_err(|err| TablebaseError::Probe(err.to_string()))?;
        Ok(match wdl {
            shakmaty_syzygy::Wdl::Loss => Wdl::Loss,
            shakmaty_syzygy::Wdl::BlessedLoss => Wdl::BlessedLoss,
            shakmaty_syzygy::Wdl::Draw => Wdl::Draw,
            shakmaty_syzygy::Wdl::CursedWin => Wdl::CursedWin,
            shakmaty_syzygy::Wdl::Win => Wdl::Win,
        })
    }
}
