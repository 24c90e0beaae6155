//! End-to-end search scenarios against the uniform test network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use engine_options::{EngineOptions, SearchOptions};
use mcts::{
    BestMoveInfo, EvalCache, GoParams, Network, NetworkComputation, NetworkError, Search,
    SearchCallbacks, SearchLimits, ThinkingInfo, TimeManager, Tree, UniformNetwork, STARTING_FEN,
};
use shakmaty::uci::UciMove;

fn uci(s: &str) -> UciMove {
    s.parse().unwrap()
}

fn options() -> SearchOptions {
    // Small batches keep visit budgets precise in tests.
    SearchOptions::default()
        .with_minibatch_size(8)
        .with_seed(42)
}

struct Harness {
    best_moves: Arc<Mutex<Vec<BestMoveInfo>>>,
    infos: Arc<Mutex<Vec<ThinkingInfo>>>,
    callbacks: SearchCallbacks,
}

impl Harness {
    fn new() -> Self {
        let best_moves: Arc<Mutex<Vec<BestMoveInfo>>> = Arc::new(Mutex::new(Vec::new()));
        let infos: Arc<Mutex<Vec<ThinkingInfo>>> = Arc::new(Mutex::new(Vec::new()));
        let best_sink = Arc::clone(&best_moves);
        let info_sink = Arc::clone(&infos);
        let callbacks = SearchCallbacks::new(
            Arc::new(move |best: &BestMoveInfo| {
                best_sink.lock().unwrap().push(best.clone());
            }),
            Arc::new(move |info: &ThinkingInfo| {
                info_sink.lock().unwrap().push(info.clone());
            }),
        );
        Self {
            best_moves,
            infos,
            callbacks,
        }
    }

    fn best_uci(&self) -> Option<String> {
        self.best_moves
            .lock()
            .unwrap()
            .last()
            .map(|b| b.best.to_uci(shakmaty::CastlingMode::Standard).to_string())
    }

    fn best_move_count(&self) -> usize {
        self.best_moves.lock().unwrap().len()
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    tree: &Tree,
    cache: &Arc<EvalCache>,
    network: Arc<dyn Network>,
    limits: SearchLimits,
    options: SearchOptions,
    harness: &Harness,
    threads: usize,
) -> Arc<Search> {
    let time = TimeManager::new(&EngineOptions::default());
    let search = Arc::new(
        Search::new(
            tree,
            network,
            Arc::clone(cache),
            None,
            limits,
            options,
            harness.callbacks.clone(),
            time.bonus_reserve(),
        )
        .unwrap(),
    );
    search.run_blocking(threads);
    search
}

#[test]
fn finds_mate_in_one() {
    let mut tree = Tree::new();
    tree.reset_to_position("7k/8/5K2/8/8/8/8/6Q1 w - - 0 1", &[])
        .unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let search = run(
        &tree,
        &cache,
        Arc::new(UniformNetwork::new()),
        SearchLimits::visits(300),
        options(),
        &harness,
        1,
    );

    assert_eq!(harness.best_uci().as_deref(), Some("g1g7"));
    assert_eq!(harness.best_move_count(), 1);
    assert!(
        search.best_eval() > 0.99,
        "mate score should saturate, got {}",
        search.best_eval()
    );
    assert_eq!(search.tb_hits(), 0);
}

#[test]
fn avoids_stalemating_a_won_position() {
    let mut tree = Tree::new();
    // Qc7 would stalemate the bare king; Qc8 mates.
    tree.reset_to_position("k7/8/1K6/8/8/8/8/2Q5 w - - 0 1", &[])
        .unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let search = run(
        &tree,
        &cache,
        Arc::new(UniformNetwork::new()),
        SearchLimits::visits(400),
        options(),
        &harness,
        1,
    );

    let best = harness.best_uci().unwrap();
    assert_ne!(best, "c1c7", "picked the stalemate");
    assert!(
        search.best_eval() > 0.9,
        "won position should score near +1, got {}",
        search.best_eval()
    );
}

#[test]
fn searchmoves_restricts_all_visits() {
    let mut tree = Tree::new();
    tree.reset_to_position(STARTING_FEN, &[]).unwrap();
    let e2e4 = uci("e2e4").to_move(tree.position_history().last()).unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let mut opts = options();
    opts.verbose_move_stats = true;
    run(
        &tree,
        &cache,
        Arc::new(UniformNetwork::new()),
        SearchLimits::visits(300).with_searchmoves(vec![e2e4]),
        opts,
        &harness,
        1,
    );

    assert_eq!(harness.best_uci().as_deref(), Some("e2e4"));

    // The verbose dump lists per-edge visit counts; only e2e4 may have any.
    let infos = harness.infos.lock().unwrap();
    let mut saw_dump = false;
    for comment in infos.iter().filter_map(|i| i.comment.as_deref()) {
        saw_dump = true;
        let visits: u64 = comment
            .split("N:")
            .nth(1)
            .and_then(|rest| rest.split('(').next())
            .and_then(|n| n.trim().parse().ok())
            .unwrap();
        if !comment.starts_with("e2e4") {
            assert_eq!(visits, 0, "visit outside searchmoves: {comment}");
        }
    }
    assert!(saw_dump, "verbose move stats were not emitted");
}

#[test]
fn forced_move_carries_saved_time() {
    let mut tree = Tree::new();
    // Black's only legal move is Kg8.
    tree.reset_to_position("7k/R7/7K/8/8/8/8/8 b - - 0 1", &[])
        .unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();

    let engine_options = EngineOptions::default();
    let time = TimeManager::new(&engine_options);
    let go = GoParams {
        wtime_ms: Some(60_000),
        btime_ms: Some(60_000),
        ..GoParams::default()
    };
    let first_budget = time
        .limits(&go, tree.ply_count(), tree.is_black_to_move())
        .time_ms
        .unwrap();

    let search = Arc::new(
        Search::new(
            &tree,
            Arc::new(UniformNetwork::new()),
            Arc::clone(&cache),
            None,
            SearchLimits::movetime(first_budget),
            options(),
            harness.callbacks.clone(),
            time.bonus_reserve(),
        )
        .unwrap(),
    );
    search.run_blocking(1);

    assert_eq!(harness.best_uci().as_deref(), Some("h8g8"));
    assert!(
        time.bonus_reserve().peek() > 0,
        "smart pruning should have banked unused time"
    );

    // The next move's budget spends the carry.
    let second_budget = time
        .limits(&go, tree.ply_count(), tree.is_black_to_move())
        .time_ms
        .unwrap();
    assert!(second_budget > first_budget);
}

struct CountingNetwork {
    inner: UniformNetwork,
    evaluations: Arc<AtomicUsize>,
}

struct CountingComputation {
    inner: Box<dyn NetworkComputation>,
    evaluations: Arc<AtomicUsize>,
}

impl Network for CountingNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(CountingComputation {
            inner: self.inner.new_computation(),
            evaluations: Arc::clone(&self.evaluations),
        })
    }
}

impl NetworkComputation for CountingComputation {
    fn add_input(&mut self, planes: Vec<mcts::encoder::InputPlane>, moves: Vec<u16>) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.inner.add_input(planes, moves);
    }

    fn batch_size(&self) -> usize {
        self.inner.batch_size()
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        self.inner.compute_blocking()
    }

    fn q(&self, index: usize) -> f32 {
        self.inner.q(index)
    }

    fn p(&self, index: usize, move_index: u16) -> f32 {
        self.inner.p(index, move_index)
    }
}

#[test]
fn cache_is_reused_across_searches() {
    let mut tree = Tree::new();
    tree.reset_to_position(STARTING_FEN, &[]).unwrap();
    let cache = Arc::new(EvalCache::new(100_000));
    let evaluations = Arc::new(AtomicUsize::new(0));
    let network = Arc::new(CountingNetwork {
        inner: UniformNetwork::new(),
        evaluations: Arc::clone(&evaluations),
    });

    let harness = Harness::new();
    let first = run(
        &tree,
        &cache,
        network.clone(),
        SearchLimits::visits(500),
        options(),
        &harness,
        1,
    );
    let first_evals = evaluations.load(Ordering::Relaxed);
    let first_playouts = first.total_playouts();
    assert!(cache.size() > 0);
    assert!(cache.hashfull() > 0);

    // Same position again: the tree and the cache both carry over.
    let second = run(
        &tree,
        &cache,
        network,
        SearchLimits::visits(500),
        options(),
        &harness,
        1,
    );
    let second_evals = evaluations.load(Ordering::Relaxed) - first_evals;
    assert!(
        second_evals < first_evals,
        "second search re-evaluated {second_evals} of {first_evals}"
    );
    assert!(second.total_playouts() < first_playouts);
}

#[test]
fn repetition_is_classified_as_draw() {
    let mut tree = Tree::new();
    // The knights have shuffled once already; one more f6g8 repeats the
    // position a second time.
    let moves: Vec<UciMove> = ["g1f3", "g8f6", "f3g1", "f6g8", "g1f3", "g8f6", "f3g1"]
        .iter()
        .map(|m| uci(m))
        .collect();
    tree.reset_to_position(STARTING_FEN, &moves).unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let mut opts = options();
    opts.verbose_move_stats = true;
    run(
        &tree,
        &cache,
        Arc::new(UniformNetwork::new()),
        SearchLimits::visits(200),
        opts,
        &harness,
        1,
    );

    let infos = harness.infos.lock().unwrap();
    let draw_line = infos
        .iter()
        .filter_map(|i| i.comment.as_deref())
        .find(|c| c.starts_with("f6g8"))
        .expect("f6g8 should appear in the verbose dump");
    assert!(
        draw_line.contains("(T)"),
        "repetition not proven terminal: {draw_line}"
    );
    assert!(
        draw_line.contains("(V:  0.0000)"),
        "draw value should be exactly zero: {draw_line}"
    );
}

#[test]
fn deterministic_with_one_thread_and_fixed_seed() {
    let mut results = Vec::new();
    for _ in 0..2 {
        let mut tree = Tree::new();
        tree.reset_to_position(STARTING_FEN, &[]).unwrap();
        let cache = Arc::new(EvalCache::new(10_000));
        let harness = Harness::new();
        let search = run(
            &tree,
            &cache,
            Arc::new(UniformNetwork::new()),
            SearchLimits::visits(200),
            options(),
            &harness,
            1,
        );
        results.push((harness.best_uci(), search.total_playouts()));
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn multithreaded_search_completes() {
    let mut tree = Tree::new();
    tree.reset_to_position(STARTING_FEN, &[]).unwrap();
    let cache = Arc::new(EvalCache::new(50_000));
    let harness = Harness::new();
    let search = run(
        &tree,
        &cache,
        Arc::new(UniformNetwork::new()),
        SearchLimits::visits(2_000),
        options().with_minibatch_size(32),
        &harness,
        4,
    );
    assert_eq!(harness.best_move_count(), 1);
    assert!(search.total_playouts() > 0);
}

#[test]
fn abort_suppresses_the_best_move() {
    let mut tree = Tree::new();
    tree.reset_to_position(STARTING_FEN, &[]).unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let time = TimeManager::new(&EngineOptions::default());
    let search = Arc::new(
        Search::new(
            &tree,
            Arc::new(UniformNetwork::new()),
            Arc::clone(&cache),
            None,
            SearchLimits::infinite(),
            options(),
            harness.callbacks.clone(),
            time.bonus_reserve(),
        )
        .unwrap(),
    );
    search.start_threads(2);
    search.abort();
    search.wait();
    assert_eq!(harness.best_move_count(), 0);
}

struct FailingNetwork;

struct FailingComputation;

impl Network for FailingNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(FailingComputation)
    }
}

impl NetworkComputation for FailingComputation {
    fn add_input(&mut self, _planes: Vec<mcts::encoder::InputPlane>, _moves: Vec<u16>) {}

    fn batch_size(&self) -> usize {
        0
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Err(NetworkError::EvaluationFailed("backend gone".into()))
    }

    fn q(&self, _index: usize) -> f32 {
        0.0
    }

    fn p(&self, _index: usize, _move_index: u16) -> f32 {
        0.0
    }
}

#[test]
fn network_failure_exits_cleanly_with_best_effort_move() {
    let mut tree = Tree::new();
    tree.reset_to_position(STARTING_FEN, &[]).unwrap();
    let cache = Arc::new(EvalCache::new(10_000));
    let harness = Harness::new();
    let time = TimeManager::new(&EngineOptions::default());
    let search = Arc::new(
        Search::new(
            &tree,
            Arc::new(FailingNetwork),
            Arc::clone(&cache),
            None,
            SearchLimits::visits(100),
            options(),
            harness.callbacks.clone(),
            time.bonus_reserve(),
        )
        .unwrap(),
    );
    search.run_blocking(2);
    // The root was extended before the failure, so some legal move is
    // still reported.
    assert_eq!(harness.best_move_count(), 1);
}
