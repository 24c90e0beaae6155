//! One search worker: the select → extend → evaluate → backup loop.
//!
//! Every iteration gathers a minibatch of leaves, runs one blocking
//! network computation for the cache misses, writes the results into the
//! leaves and backs the values up to the root. Workers cooperate on the
//! shared tree: the tree lock is held in write mode only during
//! selection (which may spawn children) and backup; the network call
//! runs with no lock held at all, which is where the parallelism pays.

use std::thread;
use std::time::Duration;

use rand_distr::{Distribution, Gamma};
use std::sync::Arc;
use tracing::trace;

use crate::batch::CachingComputation;
use crate::encoder::{encode_position_for_nn, move_to_policy_index};
use crate::network::NetworkError;
use crate::node::{EdgeId, GameResult, Node, NodeId};
use crate::search::Search;
use crate::tablebase::Wdl;
use crate::tree::TreeState;

const IDLE_SLEEP: Duration = Duration::from_millis(10);

const DIRICHLET_EPSILON: f32 = 0.25;
const DIRICHLET_ALPHA: f64 = 0.3;

/// One minibatch slot: a picked leaf or a recorded collision.
#[derive(Debug)]
struct NodeToProcess {
    node: NodeId,
    depth: u16,
    is_collision: bool,
    /// The leaf was sent to the batch (as a miss or a cache hit).
    nn_queried: bool,
    is_cache_hit: bool,
    /// Side to move at the leaf is black; move indices are mirrored.
    flip: bool,
    /// Value to back up, from the leaf's side-to-move perspective.
    v: f32,
}

impl NodeToProcess {
    fn collision(node: NodeId, depth: u16) -> Self {
        Self {
            node,
            depth,
            is_collision: true,
            nn_queried: false,
            is_cache_hit: false,
            flip: false,
            v: 0.0,
        }
    }

    fn visit(node: NodeId, depth: u16) -> Self {
        Self {
            node,
            depth,
            is_collision: false,
            nn_queried: false,
            is_cache_hit: false,
            flip: false,
            v: 0.0,
        }
    }
}

pub(crate) struct SearchWorker {
    search: Arc<Search>,
    history: crate::history::PositionHistory,
    minibatch: Vec<NodeToProcess>,
}

impl SearchWorker {
    pub fn new(search: Arc<Search>) -> Self {
        let history = search.played_history.clone();
        Self {
            search,
            history,
            minibatch: Vec::new(),
        }
    }

    /// Iterate until the search is told to stop. A network failure ends
    /// this worker and stops the whole search with a best-effort result.
    pub fn run_blocking(&mut self) {
        while self.search.is_active() {
            if let Err(err) = self.execute_one_iteration() {
                self.search.on_network_failure(&err);
                return;
            }
        }
    }

    /// One full iteration of the search loop.
    pub fn execute_one_iteration(&mut self) -> Result<(), NetworkError> {
        // 1. Initialize a fresh batch tied to the shared cache.
        let mut computation = CachingComputation::new(
            self.search.network.new_computation(),
            Arc::clone(&self.search.cache),
        );
        self.minibatch.clear();

        // 2. Gather the minibatch.
        self.gather_minibatch(&mut computation);

        // 3. Optionally fill the remaining batch slots with speculative
        // cache work.
        self.maybe_prefetch_into_cache(&mut computation);

        // 4. One network call per iteration.
        computation.compute_blocking()?;

        // 5. Write values and policies into the gathered leaves.
        self.fetch_minibatch_results(&computation);

        // 6. Propagate values to the root.
        self.do_backup_update();

        // 7. Housekeeping: smart pruning, info, stop checks.
        self.update_counters();
        Ok(())
    }

    fn gather_minibatch(&mut self, computation: &mut CachingComputation) {
        let target = self.search.params.minibatch_size as usize;
        let mut minibatch_size = 0usize;
        let mut collisions_found = 0u32;
        let mut number_out_of_order = 0usize;

        while minibatch_size < target && number_out_of_order < target {
            // If there is something to process without waking the slow
            // network, ship it rather than keep gathering.
            if minibatch_size > 0 && computation.cache_misses() == 0 {
                return;
            }

            let mut picked = self.pick_node_to_extend();
            if picked.is_collision {
                self.minibatch.push(picked);
                collisions_found += 1;
                if collisions_found > self.search.params.allowed_node_collisions {
                    return;
                }
                continue;
            }

            let is_terminal;
            {
                let state = self.search.nodes.read().expect("tree lock poisoned");
                // A node already proven terminal is simply revisited;
                // everything else gets extended now.
                if !state.arena.get(picked.node).is_terminal() {
                    self.extend_node(&state, picked.node);
                    if !state.arena.get(picked.node).is_terminal() {
                        picked.nn_queried = true;
                        picked.flip = self.history.is_black_to_move();
                        picked.is_cache_hit =
                            self.add_node_to_computation(computation, Some(picked.node), true, &state);
                    }
                }
                is_terminal = state.arena.get(picked.node).is_terminal();
            }

            if self.search.params.out_of_order_eval && (is_terminal || picked.is_cache_hit) {
                // The value is available right now; back it up without
                // waiting for the batch.
                {
                    let state = self.search.nodes.read().expect("tree lock poisoned");
                    let index = computation.batch_size().saturating_sub(1);
                    self.fetch_single_node_result(&mut picked, index, computation, &state);
                }
                self.do_backup_update_single(&picked);
                if picked.nn_queried {
                    computation.pop_cache_hit();
                }
                number_out_of_order += 1;
                continue;
            }

            minibatch_size += 1;
            self.minibatch.push(picked);
        }
    }

    /// Descend from the root by the PUCT rule, incrementing the
    /// in-flight counter of every node passed, until reaching a leaf or
    /// colliding with another worker's in-flight expansion.
    fn pick_node_to_extend(&mut self) -> NodeToProcess {
        let shared = Arc::clone(&self.search.nodes);
        let mut state = shared.write().expect("tree lock poisoned");
        let state = &mut *state;

        self.history.trim(self.search.played_history.len());

        let params = &self.search.params;
        let limits = &self.search.limits;
        let best_node_n = state.stats.best_move_edge.map_or(0, |e| {
            state
                .arena
                .edge_n(&state.arena.get(e.node).edges()[e.index])
        });

        let mut node_id = self.search.root;
        let mut is_root = true;
        let mut depth: u16 = 0;
        let mut next_index = 0usize;

        loop {
            if !is_root {
                node_id = state.arena.get_or_spawn(node_id, next_index);
            }
            depth += 1;

            let (mv, index, single_possible_move);
            {
                let arena = &state.arena;
                let node = arena.get(node_id);
                if !node.try_start_score_update() {
                    return NodeToProcess::collision(node_id, depth);
                }
                if !node.has_children() {
                    return NodeToProcess::visit(node_id, depth);
                }

                let puct_mult = f64::from(params.cpuct)
                    * f64::from(node.children_visits().max(1)).sqrt();
                let fpu = if is_root && params.noise {
                    node.q()
                } else {
                    node.q()
                        - f64::from(params.fpu_reduction)
                            * f64::from(arena.visited_policy(node)).sqrt()
                };

                let mut best_score = f64::NEG_INFINITY;
                let mut best_index: Option<usize> = None;
                let mut possible_moves = 0u32;
                for (i, edge) in node.edges().iter().enumerate() {
                    if is_root {
                        // Smart pruning: a child that can no longer catch
                        // up to the current best is not worth visits. The
                        // current best candidate always stays in.
                        let is_best_edge = state.stats.best_move_edge
                            == Some(EdgeId {
                                node: node_id,
                                index: i,
                            });
                        let deficit =
                            i64::from(best_node_n) - i64::from(arena.edge_n(edge));
                        if !is_best_edge
                            && deficit > 0
                            && state.stats.remaining_playouts < deficit as u64
                        {
                            continue;
                        }
                        if !limits.searchmoves.is_empty()
                            && !limits.searchmoves.contains(edge.mv())
                        {
                            continue;
                        }
                        possible_moves += 1;
                    }
                    let q = arena.edge_q(edge, fpu);
                    if params.sticky_checkmate && q == 1.0 && arena.edge_is_terminal(edge) {
                        // A proven mate needs no exploration bonus.
                        best_index = Some(i);
                        break;
                    }
                    let score = arena.edge_u(edge, puct_mult) + q;
                    if score > best_score {
                        best_score = score;
                        best_index = Some(i);
                    }
                }

                let best = best_index.expect("expanded node has no selectable edge");
                mv = node.edges()[best].mv().clone();
                index = best;
                single_possible_move = is_root && possible_moves <= 1 && !limits.infinite;
            }

            self.history.append(&mv);
            if single_possible_move {
                // Only one move can be played within the remaining
                // budget; the decision is already made.
                self.search.set_found_best_move();
            }
            next_index = index;
            is_root = false;
        }
    }

    /// Classify the leaf or create its edges. Runs without the write
    /// lock: other workers see n == 0 with an in-flight visit and keep
    /// out.
    fn extend_node(&self, state: &TreeState, node_id: NodeId) {
        use shakmaty::Position;

        let pos = self.history.last();
        let node = state.arena.get(node_id);
        let legal_moves = pos.legal_moves();

        if legal_moves.is_empty() {
            node.make_terminal(if pos.is_check() {
                GameResult::Loss
            } else {
                GameResult::Draw
            });
            return;
        }

        // Draws by rule only short-circuit below the root: at the root a
        // move must still be produced.
        if node_id != self.search.root {
            if pos.is_insufficient_material() {
                node.make_terminal(GameResult::Draw);
                return;
            }
            if self.history.no_capture_no_pawn_ply() >= 100 {
                node.make_terminal(GameResult::Draw);
                return;
            }
            if self.history.repetitions() >= 2 {
                node.make_terminal(GameResult::Draw);
                return;
            }
            if let Some(tablebase) = &self.search.tablebase {
                let board = pos.board();
                if !pos.castles().any()
                    && self.history.no_capture_no_pawn_ply() == 0
                    && board.occupied().count() as usize <= tablebase.max_cardinality()
                {
                    // A failed probe is not a terminal; fall through to
                    // the network.
                    if let Ok(wdl) = tablebase.probe_wdl(pos) {
                        node.make_terminal(match wdl {
                            Wdl::Win => GameResult::Win,
                            Wdl::Loss => GameResult::Loss,
                            // Cursed wins and blessed losses draw under
                            // the 50-move rule.
                            _ => GameResult::Draw,
                        });
                        self.search.count_tb_hit();
                        return;
                    }
                }
            }
        }

        node.create_edges(legal_moves);
    }

    /// Queue the current history position. Returns true when the cache
    /// already had it (for prefetch: also when it is merely in flight).
    fn add_node_to_computation(
        &self,
        computation: &mut CachingComputation,
        node_id: Option<NodeId>,
        add_if_cached: bool,
        state: &TreeState,
    ) -> bool {
        use shakmaty::Position;

        let hash = self
            .history
            .hash_last(self.search.params.cache_history_length as usize + 1);
        if add_if_cached {
            if computation.add_by_hash(hash) {
                return true;
            }
        } else if self.search.cache.contains(hash) {
            return true;
        }

        let flip = self.history.is_black_to_move();
        let moves: Vec<u16> = match node_id.map(|id| state.arena.get(id)) {
            Some(node) if node.has_children() => node
                .edges()
                .iter()
                .map(|e| move_to_policy_index(e.mv(), flip))
                .collect(),
            _ => self
                .history
                .last()
                .legal_moves()
                .iter()
                .map(|m| move_to_policy_index(m, flip))
                .collect(),
        };
        let planes = encode_position_for_nn(&self.history);
        computation.add_input(hash, planes, moves);
        false
    }

    /// When the batch has misses but slots to spare, walk the most
    /// promising unvisited lines and queue them so the network call also
    /// warms the cache for future iterations.
    fn maybe_prefetch_into_cache(&mut self, computation: &mut CachingComputation) {
        let budget = self.search.params.max_prefetch as i32 - computation.cache_misses() as i32;
        if computation.cache_misses() == 0 || budget <= 0 {
            return;
        }
        self.history.trim(self.search.played_history.len());
        let shared = Arc::clone(&self.search.nodes);
        let state = shared.read().expect("tree lock poisoned");
        self.prefetch_into_cache(&state, Some(self.search.root), budget, computation);
    }

    /// Prefetch up to `budget` positions under `node`; returns the
    /// number of slots spent.
    fn prefetch_into_cache(
        &mut self,
        state: &TreeState,
        node_id: Option<NodeId>,
        mut budget: i32,
        computation: &mut CachingComputation,
    ) -> i32 {
        if budget <= 0 {
            return 0;
        }

        let node = node_id.map(|id| state.arena.get(id));
        // An untouched leaf: cache its evaluation. The slot counts as
        // spent whether or not it was already cached, so the walk does
        // not burn time hunting for obscure lines to fill it.
        if node.map_or(true, |n| n.n_started() == 0) {
            self.add_node_to_computation(computation, node_id, false, state);
            return 1;
        }
        let node = node.expect("started node exists");
        if node.n() == 0 {
            // Being extended by another worker right now.
            return 0;
        }
        if node.is_terminal() {
            return 0;
        }

        let arena = &state.arena;
        let puct_mult =
            f64::from(self.search.params.cpuct) * f64::from(node.children_visits().max(1)).sqrt();
        // No FPU reduction here; the estimate only orders the walk.
        let parent_q = node.q();

        let mut scores: Vec<(f64, usize)> = node
            .edges()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.p() > 0.0)
            .map(|(i, e)| (-(arena.edge_u(e, puct_mult) + arena.edge_q(e, parent_q)), i))
            .collect();
        scores.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut total_spent = 0;
        let mut budget_to_spend = budget;
        for i in 0..scores.len() {
            if budget <= 0 {
                break;
            }
            let (_, edge_index) = scores[i];
            let edge = &node.edges()[edge_index];
            if i != scores.len() - 1 {
                // Give this edge only as many slots as it would take for
                // the runner-up to overtake it.
                let next_score = -scores[i + 1].0;
                let q = arena.edge_q(edge, parent_q);
                budget_to_spend = if next_score > q {
                    let headroom = f64::from(edge.p()) * puct_mult / (next_score - q)
                        - f64::from(arena.edge_n_started(edge));
                    budget.min(headroom as i32 + 1)
                } else {
                    budget
                };
            }
            let mv = edge.mv().clone();
            let child = edge.child();
            self.history.append(&mv);
            let spent = self.prefetch_into_cache(
                state,
                if child.is_some() { Some(child) } else { None },
                budget_to_spend,
                computation,
            );
            self.history.pop();
            budget -= spent;
            total_spent += spent;
        }
        total_spent
    }

    fn fetch_minibatch_results(&mut self, computation: &CachingComputation) {
        let shared = Arc::clone(&self.search.nodes);
        let state = shared.read().expect("tree lock poisoned");
        let mut index_in_computation = 0;
        for entry in &mut self.minibatch {
            let nn_queried = entry.nn_queried;
            Self::fetch_single(
                &self.search,
                entry,
                index_in_computation,
                computation,
                &state,
            );
            if nn_queried {
                index_in_computation += 1;
            }
        }
    }

    fn fetch_single_node_result(
        &self,
        entry: &mut NodeToProcess,
        index_in_computation: usize,
        computation: &CachingComputation,
        state: &TreeState,
    ) {
        Self::fetch_single(&self.search, entry, index_in_computation, computation, state);
    }

    fn fetch_single(
        search: &Search,
        entry: &mut NodeToProcess,
        index_in_computation: usize,
        computation: &CachingComputation,
        state: &TreeState,
    ) {
        if entry.is_collision {
            return;
        }
        let node = state.arena.get(entry.node);
        if !entry.nn_queried {
            // Terminal: the proven value is already on the node.
            entry.v = node.q() as f32;
            return;
        }

        entry.v = computation.q(index_in_computation);

        let mut total = 0.0f32;
        for edge in node.edges() {
            let mut p =
                computation.p(index_in_computation, move_to_policy_index(edge.mv(), entry.flip));
            if search.params.policy_softmax_temp != 1.0 {
                p = p.powf(1.0 / search.params.policy_softmax_temp);
            }
            edge.set_p(p);
            // Quantization rounds, so sum what was actually stored.
            total += edge.p();
        }
        if total > 0.0 {
            let scale = 1.0 / total;
            for edge in node.edges() {
                edge.set_p(edge.p() * scale);
            }
        }
        if search.params.noise && entry.node == search.root {
            Self::apply_dirichlet_noise(search, node);
        }
    }

    fn apply_dirichlet_noise(search: &Search, node: &Node) {
        let gamma = Gamma::new(DIRICHLET_ALPHA, 1.0).expect("valid gamma parameters");
        let mut rng = search.rng.lock().expect("rng lock poisoned");
        let noise: Vec<f32> = node
            .edges()
            .iter()
            .map(|_| gamma.sample(&mut *rng) as f32)
            .collect();
        let total: f32 = noise.iter().sum();
        if total < f32::MIN_POSITIVE {
            return;
        }
        for (edge, eta) in node.edges().iter().zip(noise) {
            edge.set_p(edge.p() * (1.0 - DIRICHLET_EPSILON) + DIRICHLET_EPSILON * eta / total);
        }
    }

    fn do_backup_update(&self) {
        let mut state = self.search.nodes.write().expect("tree lock poisoned");
        for entry in &self.minibatch {
            Self::backup_single(&mut state, entry, &self.search);
        }
    }

    fn do_backup_update_single(&self, entry: &NodeToProcess) {
        let mut state = self.search.nodes.write().expect("tree lock poisoned");
        Self::backup_single(&mut state, entry, &self.search);
    }

    fn backup_single(state: &mut TreeState, entry: &NodeToProcess, search: &Search) {
        if entry.is_collision {
            // Undo the in-flight counters above the collision point; the
            // collided node itself never registered this worker.
            let mut id = state.arena.get(entry.node).parent();
            while id.is_some() {
                let node = state.arena.get(id);
                node.cancel_score_update();
                id = node.parent();
            }
            return;
        }

        let mut v = entry.v;
        let mut id = entry.node;
        while id.is_some() {
            let node = state.arena.get(id);
            node.finalize_score_update(v);
            v = -v;

            let parent = node.parent();
            if parent == search.root {
                let n = node.n();
                let best_n = state.stats.best_move_edge.map_or(0, |e| {
                    state
                        .arena
                        .edge_n(&state.arena.get(e.node).edges()[e.index])
                });
                if best_n <= n {
                    state.stats.best_move_edge =
                        search.best_child_no_temperature(&state.arena, search.root);
                }
            }
            id = parent;
        }

        state.stats.total_playouts += 1;
        state.stats.cum_depth += u64::from(entry.depth);
        state.stats.max_depth = state.stats.max_depth.max(u32::from(entry.depth));
    }

    fn update_counters(&self) {
        self.search.update_remaining_playouts();
        self.search.maybe_output_info();
        self.search.maybe_trigger_stop();

        // Collisions are not work; a batch of nothing else means the
        // tree is saturated with in-flight visits, so yield for a bit.
        let work_done = self.minibatch.iter().any(|entry| !entry.is_collision);
        if !work_done {
            trace!("iteration produced only collisions; idling");
            thread::sleep(IDLE_SLEEP);
        }
    }
}
