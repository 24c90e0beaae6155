//! Neural-network-guided Monte Carlo Tree Search for chess.
//!
//! This crate is the search core of a UCI chess engine: the tree data
//! structure, the batched selection/expansion/backup cycle, the
//! evaluation cache, tablebase shortcuts, smart-pruning time management
//! and the thread coordination that lets workers share one tree. The
//! UCI text loop, the real network backend and option parsing live in
//! the host; they talk to this crate through [`Tree`], [`Search`], the
//! [`Network`] trait and the callbacks in [`info`].
//!
//! # Running a search
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use engine_options::SearchOptions;
//! use mcts::{
//!     EvalCache, Search, SearchCallbacks, SearchLimits, TimeManager, Tree, UniformNetwork,
//! };
//!
//! let tree = Tree::new();
//! let cache = Arc::new(EvalCache::new(200_000));
//! let network = Arc::new(UniformNetwork::new());
//! let time = TimeManager::new(&engine_options::EngineOptions::default());
//!
//! let search = Arc::new(
//!     Search::new(
//!         &tree,
//!         network,
//!         cache,
//!         None,
//!         SearchLimits::visits(800),
//!         SearchOptions::default(),
//!         SearchCallbacks::new(
//!             Arc::new(|best| println!("bestmove {}", best.best)),
//!             Arc::new(|info| println!("info depth {}", info.depth)),
//!         ),
//!         time.bonus_reserve(),
//!     )
//!     .unwrap(),
//! );
//! search.run_blocking(2);
//! ```

pub mod arena;
pub mod batch;
pub mod cache;
pub mod encoder;
pub mod history;
pub mod info;
pub mod limits;
pub mod network;
pub mod node;
pub mod search;
pub mod tablebase;
pub mod time;
pub mod tree;
mod worker;

pub use cache::{CachedEvaluation, EvalCache};
pub use history::PositionHistory;
pub use info::{BestMoveCallback, BestMoveInfo, InfoCallback, ThinkingInfo};
pub use limits::{GoParams, SearchLimits};
pub use network::{Network, NetworkComputation, NetworkError, UniformNetwork};
pub use node::{GameResult, NodeId};
pub use search::{Search, SearchCallbacks, SearchError};
pub use tablebase::{SyzygyTablebase, TablebaseError, TablebaseProber, Wdl};
pub use time::{BonusReserve, TimeManager};
pub use tree::{Tree, TreeError, STARTING_FEN};
