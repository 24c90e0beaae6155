//! Search coordinator.
//!
//! A `Search` is created per `go` command and drives a watchdog thread
//! plus N worker threads over the shared tree. It owns the stop
//! protocol: budget checks, smart pruning, the single best-move
//! callback, and info emission. Two locks are involved; when both are
//! held the order is always the tree (nodes) lock first, then the
//! counters mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use engine_options::{OptionsError, SearchOptions};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use shakmaty::CastlingMode;
use thiserror::Error;
use tracing::{debug, error};

use crate::arena::NodeArena;
use crate::cache::EvalCache;
use crate::history::PositionHistory;
use crate::info::{
    q_to_centipawns, BestMoveCallback, BestMoveInfo, InfoCallback, ThinkingInfo,
};
use crate::limits::SearchLimits;
use crate::network::{Network, NetworkError};
use crate::node::{EdgeId, NodeId};
use crate::tablebase::TablebaseProber;
use crate::time::BonusReserve;
use crate::tree::{SearchStats, Tree, TreeState};
use crate::worker::SearchWorker;

/// Maximum silence between `info` lines while nothing changes.
const UCI_INFO_MIN_FREQUENCY_MS: u64 = 5000;
/// Slack terms of the smart-pruning nps estimate.
const SMART_PRUNING_TOLERANCE_NODES: u64 = 100;
const SMART_PRUNING_TOLERANCE_MS: u64 = 200;
/// Watchdog wake interval.
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// The two callbacks a search reports through.
#[derive(Clone)]
pub struct SearchCallbacks {
    pub best_move: BestMoveCallback,
    pub info: InfoCallback,
}

impl SearchCallbacks {
    pub fn new(best_move: BestMoveCallback, info: InfoCallback) -> Self {
        Self { best_move, info }
    }

    /// Callbacks that drop everything; used by tests and benches.
    pub fn silent() -> Self {
        Self {
            best_move: Arc::new(|_| {}),
            info: Arc::new(|_| {}),
        }
    }
}

#[derive(Default)]
struct Counters {
    stop: bool,
    responded_bestmove: bool,
    found_best_move: bool,
    network_failed: bool,
    best_move: Option<BestMoveInfo>,
}

pub struct Search {
    pub(crate) nodes: Arc<RwLock<TreeState>>,
    pub(crate) root: NodeId,
    pub(crate) played_history: PositionHistory,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) cache: Arc<EvalCache>,
    pub(crate) tablebase: Option<Arc<dyn TablebaseProber>>,
    pub(crate) limits: SearchLimits,
    pub(crate) params: SearchOptions,
    pub(crate) rng: Mutex<ChaCha20Rng>,
    start_time: Instant,
    /// Root visits carried over from previous searches via re-rooting.
    initial_visits: u32,
    callbacks: SearchCallbacks,
    counters: Mutex<Counters>,
    watchdog_cv: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    tb_hits: AtomicU64,
    bonus: Arc<BonusReserve>,
}

impl Search {
    /// Set up a search over `tree`. Options are validated here, so a
    /// misconfigured search fails before any thread starts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &Tree,
        network: Arc<dyn Network>,
        cache: Arc<EvalCache>,
        tablebase: Option<Arc<dyn TablebaseProber>>,
        limits: SearchLimits,
        params: SearchOptions,
        callbacks: SearchCallbacks,
        bonus: Arc<BonusReserve>,
    ) -> Result<Self, SearchError> {
        params.validate()?;
        let nodes = tree.shared();
        let (root, initial_visits) = {
            let mut state = nodes.write().expect("tree lock poisoned");
            state.stats = SearchStats::reset();
            (state.root, state.arena.get(state.root).n())
        };
        let rng = match params.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Ok(Self {
            nodes,
            root,
            played_history: tree.position_history().clone(),
            network,
            cache,
            tablebase,
            limits,
            params,
            rng: Mutex::new(rng),
            start_time: Instant::now(),
            initial_visits,
            callbacks,
            counters: Mutex::new(Counters::default()),
            watchdog_cv: Condvar::new(),
            threads: Mutex::new(Vec::new()),
            tb_hits: AtomicU64::new(0),
            bonus,
        })
    }

    /// Spawn the watchdog plus `how_many` workers.
    pub fn start_threads(self: &Arc<Self>, how_many: usize) {
        let mut threads = self.threads.lock().expect("threads lock poisoned");
        if threads.is_empty() {
            let search = Arc::clone(self);
            threads.push(std::thread::spawn(move || search.watchdog_thread()));
        }
        while threads.len() <= how_many {
            let search = Arc::clone(self);
            threads.push(std::thread::spawn(move || {
                SearchWorker::new(search).run_blocking();
            }));
        }
    }

    /// Start threads and block until the search finishes.
    pub fn run_blocking(self: &Arc<Self>, threads: usize) {
        self.start_threads(threads);
        self.wait();
    }

    pub fn is_active(&self) -> bool {
        !self.counters.lock().expect("counters lock poisoned").stop
    }

    /// Request a stop; the best move is still delivered.
    pub fn stop(&self) {
        self.counters.lock().expect("counters lock poisoned").stop = true;
        self.watchdog_cv.notify_all();
    }

    /// Stop without delivering a best move. For teardown mid-search.
    pub fn abort(&self) {
        {
            let mut counters = self.counters.lock().expect("counters lock poisoned");
            counters.responded_bestmove = true;
            counters.stop = true;
        }
        self.watchdog_cv.notify_all();
    }

    /// Join every thread of this search.
    pub fn wait(&self) {
        let handles: Vec<_> = {
            let mut threads = self.threads.lock().expect("threads lock poisoned");
            threads.drain(..).collect()
        };
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn watchdog_thread(self: Arc<Self>) {
        while self.is_active() {
            {
                let guard = self.counters.lock().expect("counters lock poisoned");
                let wait = match self.limits.time_ms {
                    Some(t) => {
                        Duration::from_millis(t.saturating_sub(self.elapsed_ms()))
                            .min(WATCHDOG_INTERVAL)
                    }
                    None => WATCHDOG_INTERVAL,
                };
                let _ = self
                    .watchdog_cv
                    .wait_timeout_while(guard, wait, |c| !c.stop)
                    .expect("counters lock poisoned");
            }
            self.maybe_trigger_stop();
        }
        self.maybe_trigger_stop();
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Check every stop condition; on the first transition to stopped,
    /// emit the final info, deliver the best move exactly once and store
    /// the smart-pruning time bonus.
    pub(crate) fn maybe_trigger_stop(&self) {
        let mut state = self.nodes.write().expect("tree lock poisoned");
        let mut counters = self.counters.lock().expect("counters lock poisoned");
        if counters.responded_bestmove {
            return;
        }
        // Never stop on an unexpanded root, except when the network is
        // gone and no progress can ever be made.
        if state.stats.total_playouts == 0 && !counters.network_failed {
            return;
        }
        if counters.found_best_move {
            counters.stop = true;
        }
        if let Some(playouts) = self.limits.playouts {
            if state.stats.total_playouts >= playouts {
                counters.stop = true;
            }
        }
        if let Some(visits) = self.limits.visits {
            if state.stats.total_playouts + u64::from(self.initial_visits) >= visits {
                counters.stop = true;
            }
        }
        if let Some(time_ms) = self.limits.time_ms {
            if self.elapsed_ms() >= time_ms {
                counters.stop = true;
            }
        }
        if counters.stop {
            self.send_uci_info(&mut state);
            if self.params.verbose_move_stats {
                self.send_move_stats(&state);
            }
            let best = self.best_move_from(&state);
            if let Some(best_move) = &best {
                (self.callbacks.best_move)(best_move);
            }
            counters.best_move = best;
            counters.responded_bestmove = true;
            state.stats.best_move_edge = None;
            if counters.found_best_move {
                if let Some(time_ms) = self.limits.time_ms {
                    let saved = time_ms.saturating_sub(self.elapsed_ms());
                    self.bonus.store(saved);
                    debug!(saved_ms = saved, "carrying unused smart-pruning time");
                }
            }
            self.watchdog_cv.notify_all();
        }
    }

    /// Recompute the smart-pruning playout budget from whichever limit
    /// is tightest: projected time, visits or playouts.
    pub(crate) fn update_remaining_playouts(&self) {
        if self.params.futile_search_aversion <= 0.0 {
            return;
        }
        let mut state = self.nodes.write().expect("tree lock poisoned");
        let mut remaining = u64::MAX;
        if let Some(time_ms) = self.limits.time_ms {
            let elapsed = self.elapsed_ms();
            if elapsed > SMART_PRUNING_TOLERANCE_MS {
                let nps = (1000 * state.stats.total_playouts + SMART_PRUNING_TOLERANCE_NODES)
                    / (elapsed - SMART_PRUNING_TOLERANCE_MS)
                    + 1;
                let remaining_time = time_ms.saturating_sub(elapsed);
                let projected = (remaining_time as f64 * nps as f64
                    / f64::from(self.params.futile_search_aversion)
                    / 1000.0) as u64;
                remaining = remaining.min(projected);
            }
        }
        if let Some(visits) = self.limits.visits {
            // The batch can overshoot by up to a minibatch.
            let slack = u64::from(self.params.minibatch_size);
            let used = state.stats.total_playouts + u64::from(self.initial_visits);
            remaining = remaining.min((visits + slack).saturating_sub(used + 1));
        }
        if let Some(playouts) = self.limits.playouts {
            let slack = u64::from(self.params.minibatch_size);
            remaining = remaining.min(
                (playouts + slack + 1).saturating_sub(state.stats.total_playouts),
            );
        }
        state.stats.remaining_playouts = remaining.max(1);
    }

    /// Emit an `info` line when the best move or depth summary changed,
    /// or the minimum frequency elapsed.
    pub(crate) fn maybe_output_info(&self) {
        let mut state = self.nodes.write().expect("tree lock poisoned");
        let counters = self.counters.lock().expect("counters lock poisoned");
        if counters.responded_bestmove {
            return;
        }
        let interesting = {
            let stats = &state.stats;
            match stats.best_move_edge {
                None => return,
                Some(best_edge) => {
                    stats.last_outputted_edge != Some(best_edge)
                        || stats.last_info_depth != stats.average_depth()
                        || stats.last_info_seldepth != stats.max_depth
                        || stats.last_info_time_ms + UCI_INFO_MIN_FREQUENCY_MS
                            < self.elapsed_ms()
                }
            }
        };
        if interesting {
            drop(counters);
            self.send_uci_info(&mut state);
        }
    }

    fn send_uci_info(&self, state: &mut TreeState) {
        let Some(best_edge) = state.stats.best_move_edge else {
            return;
        };
        let elapsed = self.elapsed_ms();
        let depth = state.stats.average_depth();
        let info = {
            let arena = &state.arena;
            let edge = &arena.get(best_edge.node).edges()[best_edge.index];
            let mut pv = Vec::new();
            let mut current = best_edge;
            loop {
                let e = &arena.get(current.node).edges()[current.index];
                pv.push(e.mv().to_uci(CastlingMode::Standard));
                let child = e.child();
                if child.is_none() {
                    break;
                }
                match self.best_child_no_temperature(arena, child) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            ThinkingInfo {
                depth,
                seldepth: state.stats.max_depth,
                time_ms: elapsed,
                nodes: state.stats.total_playouts + u64::from(self.initial_visits),
                hashfull: self.cache.hashfull(),
                nps: if elapsed > 0 {
                    state.stats.total_playouts * 1000 / elapsed
                } else {
                    0
                },
                score_cp: Some(q_to_centipawns(arena.edge_q(edge, 0.0))),
                tb_hits: self.tb_hits.load(Ordering::Acquire),
                pv,
                comment: None,
            }
        };
        state.stats.last_outputted_edge = Some(best_edge);
        state.stats.last_info_depth = depth;
        state.stats.last_info_seldepth = state.stats.max_depth;
        state.stats.last_info_time_ms = elapsed;
        (self.callbacks.info)(&info);
    }

    /// Dump per-move statistics for every root edge, least promising
    /// first, as info comments.
    fn send_move_stats(&self, state: &TreeState) {
        let arena = &state.arena;
        let root = arena.get(self.root);
        let parent_q = root.q()
            - f64::from(self.params.fpu_reduction)
                * f64::from(arena.visited_policy(root)).sqrt();
        let u_coeff =
            f64::from(self.params.cpuct) * f64::from(root.children_visits().max(1)).sqrt();

        let mut order: Vec<usize> = (0..root.edges().len()).collect();
        order.sort_by(|&a, &b| {
            let ea = &root.edges()[a];
            let eb = &root.edges()[b];
            let ka = (
                arena.edge_n(ea),
                arena.edge_q(ea, parent_q) + arena.edge_u(ea, u_coeff),
            );
            let kb = (
                arena.edge_n(eb),
                arena.edge_q(eb, parent_q) + arena.edge_u(eb, u_coeff),
            );
            ka.0.cmp(&kb.0)
                .then(ka.1.partial_cmp(&kb.1).unwrap_or(std::cmp::Ordering::Equal))
        });

        for index in order {
            let edge = &root.edges()[index];
            let q = arena.edge_q(edge, parent_q);
            let u = arena.edge_u(edge, u_coeff);
            let v = if arena.edge_is_terminal(edge) {
                Some(0.0 - arena.get(edge.child()).q())
            } else {
                self.cached_first_ply_q(edge.mv()).map(|q| 0.0 - f64::from(q))
            };
            let v = match v {
                Some(v) => format!("{v:7.4}"),
                None => " -.----".to_string(),
            };
            let child = edge.child();
            let in_flight = if child.is_some() {
                arena.get(child).n_in_flight()
            } else {
                0
            };
            let comment = format!(
                "{:<5} N: {:7} (+{:2}) (P: {:5.2}%) (Q: {:8.5}) (U: {:6.5}) (Q+U: {:8.5}) (V: {}) {}",
                edge.mv().to_uci(CastlingMode::Standard).to_string(),
                arena.edge_n(edge),
                in_flight,
                edge.p() * 100.0,
                q,
                u,
                q + u,
                v,
                if arena.edge_is_terminal(edge) { "(T)" } else { "" },
            );
            let info = ThinkingInfo {
                comment: Some(comment),
                ..ThinkingInfo::default()
            };
            (self.callbacks.info)(&info);
        }
    }

    /// Cached network value of the position after `mv` from the root.
    fn cached_first_ply_q(&self, mv: &shakmaty::Move) -> Option<f32> {
        let mut history = self.played_history.clone();
        history.append(mv);
        let hash = history.hash_last(self.search_cache_history() + 1);
        self.cache.get(hash).map(|eval| eval.q())
    }

    fn search_cache_history(&self) -> usize {
        self.params.cache_history_length as usize
    }

    /// Most visited child; ties break on value, then prior. Root edges
    /// outside `searchmoves` never qualify.
    pub(crate) fn best_child_no_temperature(
        &self,
        arena: &NodeArena,
        parent: NodeId,
    ) -> Option<EdgeId> {
        let node = arena.get(parent);
        let mut best: Option<(u32, f64, f32, usize)> = None;
        for (index, edge) in node.edges().iter().enumerate() {
            if parent == self.root
                && !self.limits.searchmoves.is_empty()
                && !self.limits.searchmoves.contains(edge.mv())
            {
                continue;
            }
            let key = (arena.edge_n(edge), arena.edge_q(edge, -10.0), edge.p());
            let better = match &best {
                None => true,
                Some((n, q, p, _)) => {
                    key.0 > *n
                        || (key.0 == *n && (key.1 > *q || (key.1 == *q && key.2 > *p)))
                }
            };
            if better {
                best = Some((key.0, key.1, key.2, index));
            }
        }
        best.map(|(_, _, _, index)| EdgeId {
            node: parent,
            index,
        })
    }

    /// Sample a child with probability proportional to
    /// `(n / n_parent)^(1/temperature)`.
    fn best_child_with_temperature(
        &self,
        arena: &NodeArena,
        parent: NodeId,
        temperature: f64,
    ) -> Option<EdgeId> {
        let node = arena.get(parent);
        let n_parent = f64::from(node.n().max(1));
        let mut cumulative = Vec::new();
        let mut indices = Vec::new();
        let mut sum = 0.0;
        for (index, edge) in node.edges().iter().enumerate() {
            if parent == self.root
                && !self.limits.searchmoves.is_empty()
                && !self.limits.searchmoves.contains(edge.mv())
            {
                continue;
            }
            sum += (f64::from(arena.edge_n(edge)) / n_parent).powf(1.0 / temperature);
            cumulative.push(sum);
            indices.push(index);
        }
        if indices.is_empty() || sum <= 0.0 {
            return self.best_child_no_temperature(arena, parent);
        }
        let toss: f64 = self.rng.lock().expect("rng lock poisoned").gen::<f64>() * sum;
        let position = cumulative
            .iter()
            .position(|&c| c > toss)
            .unwrap_or(indices.len() - 1);
        Some(EdgeId {
            node: parent,
            index: indices[position],
        })
    }

    /// Best move (and ponder move) from the current statistics,
    /// honoring temperature and its decay.
    fn best_move_from(&self, state: &TreeState) -> Option<BestMoveInfo> {
        let arena = &state.arena;
        if !arena.get(self.root).has_children() {
            return None;
        }
        let mut temperature = f64::from(self.params.temperature);
        if temperature > 0.0 && self.params.tempdecay_moves > 0 {
            let moves = self.played_history.game_ply() / 2;
            if moves >= self.params.tempdecay_moves {
                temperature = 0.0;
            } else {
                temperature *= f64::from(self.params.tempdecay_moves - moves)
                    / f64::from(self.params.tempdecay_moves);
            }
        }
        let best = if temperature > 0.0 && arena.get(self.root).children_visits() > 0 {
            self.best_child_with_temperature(arena, self.root, temperature)
        } else {
            self.best_child_no_temperature(arena, self.root)
        }?;
        let edge = &arena.get(best.node).edges()[best.index];
        let child = edge.child();
        // Ponder move: the best reply, never sampled.
        let ponder = if child.is_some() && arena.get(child).has_children() {
            self.best_child_no_temperature(arena, child)
                .map(|p| arena.get(p.node).edges()[p.index].mv().clone())
        } else {
            None
        };
        Some(BestMoveInfo {
            best: edge.mv().clone(),
            ponder,
        })
    }

    /// The move the search would answer right now (the delivered one
    /// once the search has responded).
    pub fn best_move(&self) -> Option<BestMoveInfo> {
        let state = self.nodes.read().expect("tree lock poisoned");
        let counters = self.counters.lock().expect("counters lock poisoned");
        if counters.responded_bestmove {
            return counters.best_move.clone();
        }
        self.best_move_from(&state)
    }

    /// Value of the best root child regardless of temperature, or the
    /// root's own value while childless.
    pub fn best_eval(&self) -> f64 {
        let state = self.nodes.read().expect("tree lock poisoned");
        let root = state.arena.get(self.root);
        let parent_q = root.q();
        if !root.has_children() {
            return parent_q;
        }
        match self.best_child_no_temperature(&state.arena, self.root) {
            Some(e) => state
                .arena
                .edge_q(&state.arena.get(e.node).edges()[e.index], parent_q),
            None => parent_q,
        }
    }

    /// Playouts completed by this search.
    pub fn total_playouts(&self) -> u64 {
        self.nodes
            .read()
            .expect("tree lock poisoned")
            .stats
            .total_playouts
    }

    pub fn tb_hits(&self) -> u64 {
        self.tb_hits.load(Ordering::Acquire)
    }

    pub(crate) fn count_tb_hit(&self) {
        self.tb_hits.fetch_add(1, Ordering::AcqRel);
    }

    /// Called from selection when at most one root move remains
    /// playable within the remaining budget.
    pub(crate) fn set_found_best_move(&self) {
        self.counters
            .lock()
            .expect("counters lock poisoned")
            .found_best_move = true;
    }

    /// A worker's network call failed: stop everything and let the stop
    /// path deliver whatever statistics exist.
    pub(crate) fn on_network_failure(&self, err: &NetworkError) {
        error!(%err, "network computation failed, stopping search");
        {
            let mut counters = self.counters.lock().expect("counters lock poisoned");
            counters.network_failed = true;
            counters.stop = true;
        }
        self.watchdog_cv.notify_all();
        self.maybe_trigger_stop();
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        // Threads hold an Arc to the search, so by the time this runs
        // they are already gone; this only covers a search that was
        // never started or never waited on.
        self.wait();
    }
}
