//! Option struct definitions.
//!
//! Typed option dictionaries with serde deserialization support, default
//! values and range validation. `SearchOptions` covers everything a single
//! search reads; `EngineOptions` covers process-level knobs (thread count,
//! cache size, time management curve, tablebase paths).

use crate::defaults;
use crate::OptionsError;
use serde::Deserialize;

/// Per-search tunables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchOptions {
    /// Target number of leaves per NN call.
    #[serde(default = "defaults::minibatch_size")]
    pub minibatch_size: u32,
    /// Extra cache-fill descents per batch (0 disables prefetch).
    #[serde(default = "defaults::max_prefetch")]
    pub max_prefetch: u32,
    /// PUCT exploration coefficient.
    #[serde(default = "defaults::cpuct")]
    pub cpuct: f32,
    /// Root move-sampling temperature (0 = pick the most visited move).
    #[serde(default = "defaults::temperature")]
    pub temperature: f32,
    /// Half-moves over which the temperature decays linearly to zero.
    #[serde(default = "defaults::tempdecay_moves")]
    pub tempdecay_moves: u32,
    /// Mix Dirichlet noise into root priors.
    #[serde(default = "defaults::noise")]
    pub noise: bool,
    /// Emit per-move statistics for every root edge on stop.
    #[serde(default = "defaults::verbose_move_stats")]
    pub verbose_move_stats: bool,
    /// Smart-pruning aggressiveness (0 disables smart pruning).
    #[serde(default = "defaults::futile_search_aversion")]
    pub futile_search_aversion: f32,
    /// First-play-urgency reduction applied to unvisited children.
    #[serde(default = "defaults::fpu_reduction")]
    pub fpu_reduction: f32,
    /// Plies of history folded into the evaluation-cache fingerprint.
    #[serde(default = "defaults::cache_history_length")]
    pub cache_history_length: u32,
    /// Policy re-sharpening exponent (priors are raised to 1/temp).
    #[serde(default = "defaults::policy_softmax_temp")]
    pub policy_softmax_temp: f32,
    /// Collision tolerance per gathered batch.
    #[serde(default = "defaults::allowed_node_collisions")]
    pub allowed_node_collisions: u32,
    /// Back up terminals and cache hits immediately, out of batch order.
    #[serde(default = "defaults::out_of_order_eval")]
    pub out_of_order_eval: bool,
    /// Select a proven checkmate unconditionally during descent.
    #[serde(default = "defaults::sticky_checkmate")]
    pub sticky_checkmate: bool,
    /// RNG seed; fixes noise and temperature sampling for reproducibility.
    #[serde(default = "defaults::seed")]
    pub seed: Option<u64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            minibatch_size: defaults::minibatch_size(),
            max_prefetch: defaults::max_prefetch(),
            cpuct: defaults::cpuct(),
            temperature: defaults::temperature(),
            tempdecay_moves: defaults::tempdecay_moves(),
            noise: defaults::noise(),
            verbose_move_stats: defaults::verbose_move_stats(),
            futile_search_aversion: defaults::futile_search_aversion(),
            fpu_reduction: defaults::fpu_reduction(),
            cache_history_length: defaults::cache_history_length(),
            policy_softmax_temp: defaults::policy_softmax_temp(),
            allowed_node_collisions: defaults::allowed_node_collisions(),
            out_of_order_eval: defaults::out_of_order_eval(),
            sticky_checkmate: defaults::sticky_checkmate(),
            seed: defaults::seed(),
        }
    }
}

impl SearchOptions {
    /// Validate every option against its permitted range.
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_u32("minibatch-size", self.minibatch_size, 1, 1024)?;
        check_u32("max-prefetch", self.max_prefetch, 0, 1024)?;
        check_f32("cpuct", self.cpuct, 0.0, 100.0)?;
        check_f32("temperature", self.temperature, 0.0, 100.0)?;
        check_u32("tempdecay-moves", self.tempdecay_moves, 0, 100)?;
        check_f32(
            "futile-search-aversion",
            self.futile_search_aversion,
            0.0,
            10.0,
        )?;
        check_f32("fpu-reduction", self.fpu_reduction, -100.0, 100.0)?;
        check_u32("cache-history-length", self.cache_history_length, 0, 7)?;
        check_f32("policy-softmax-temp", self.policy_softmax_temp, 0.1, 10.0)?;
        check_u32(
            "allowed-node-collisions",
            self.allowed_node_collisions,
            0,
            1024,
        )?;
        Ok(())
    }

    pub fn with_minibatch_size(mut self, n: u32) -> Self {
        self.minibatch_size = n;
        self
    }

    pub fn with_cpuct(mut self, c: f32) -> Self {
        self.cpuct = c;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Process-level engine configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineOptions {
    /// Worker thread count (a watchdog thread is added on top).
    #[serde(default = "defaults::threads")]
    pub threads: u32,
    /// Evaluation cache capacity in entries.
    #[serde(default = "defaults::nncache")]
    pub nncache: usize,
    /// Scale factor applied to the per-move time budget.
    #[serde(default = "defaults::slowmover")]
    pub slowmover: f32,
    /// Safety buffer subtracted from the clock, in milliseconds.
    #[serde(default = "defaults::move_overhead_ms")]
    pub move_overhead_ms: u64,
    /// Ply at which the game-length survival curve is at half maximum.
    #[serde(default = "defaults::time_curve_midpoint")]
    pub time_curve_midpoint: f32,
    /// Slope of the game-length survival curve.
    #[serde(default = "defaults::time_curve_steepness")]
    pub time_curve_steepness: f32,
    /// Colon-separated Syzygy tablebase directories, if any.
    #[serde(default = "defaults::syzygy_paths")]
    pub syzygy_paths: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: defaults::threads(),
            nncache: defaults::nncache(),
            slowmover: defaults::slowmover(),
            move_overhead_ms: defaults::move_overhead_ms(),
            time_curve_midpoint: defaults::time_curve_midpoint(),
            time_curve_steepness: defaults::time_curve_steepness(),
            syzygy_paths: defaults::syzygy_paths(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        check_u32("threads", self.threads, 1, 128)?;
        if self.nncache > 999_999_999 {
            return Err(OptionsError::OutOfRange {
                name: "nncache",
                value: self.nncache.to_string(),
                min: "0".to_string(),
                max: "999999999".to_string(),
            });
        }
        check_f32("slowmover", self.slowmover, 0.0, 100.0)?;
        if self.move_overhead_ms > 10_000 {
            return Err(OptionsError::OutOfRange {
                name: "move-overhead",
                value: self.move_overhead_ms.to_string(),
                min: "0".to_string(),
                max: "10000".to_string(),
            });
        }
        check_f32("time-curve-midpoint", self.time_curve_midpoint, 1.0, 200.0)?;
        check_f32(
            "time-curve-steepness",
            self.time_curve_steepness,
            1.0,
            100.0,
        )?;
        Ok(())
    }

    pub fn with_threads(mut self, n: u32) -> Self {
        self.threads = n;
        self
    }

    pub fn with_nncache(mut self, entries: usize) -> Self {
        self.nncache = entries;
        self
    }
}

fn check_u32(name: &'static str, value: u32, min: u32, max: u32) -> Result<(), OptionsError> {
    if value < min || value > max {
        return Err(OptionsError::OutOfRange {
            name,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

fn check_f32(name: &'static str, value: f32, min: f32, max: f32) -> Result<(), OptionsError> {
    if !value.is_finite() || value < min || value > max {
        return Err(OptionsError::OutOfRange {
            name,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}
