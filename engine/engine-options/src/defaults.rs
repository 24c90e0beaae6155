//! Default option values.
//!
//! Single source of truth for defaults, used both by `Default` impls and
//! by the `#[serde(default = "...")]` attributes in `structs.rs`. The
//! search defaults are the tuned values shipped for tournament play, not
//! the conservative minimums.

// Search options.

pub fn minibatch_size() -> u32 {
    256
}
pub fn max_prefetch() -> u32 {
    32
}
pub fn cpuct() -> f32 {
    3.4
}
pub fn temperature() -> f32 {
    0.0
}
pub fn tempdecay_moves() -> u32 {
    0
}
pub fn noise() -> bool {
    false
}
pub fn verbose_move_stats() -> bool {
    false
}
pub fn futile_search_aversion() -> f32 {
    1.33
}
pub fn fpu_reduction() -> f32 {
    0.9
}
pub fn cache_history_length() -> u32 {
    1
}
pub fn policy_softmax_temp() -> f32 {
    2.2
}
pub fn allowed_node_collisions() -> u32 {
    32
}
pub fn out_of_order_eval() -> bool {
    false
}
pub fn sticky_checkmate() -> bool {
    false
}
pub fn seed() -> Option<u64> {
    None
}

// Engine options.

pub fn threads() -> u32 {
    2
}
pub fn nncache() -> usize {
    200_000
}
pub fn slowmover() -> f32 {
    1.0
}
pub fn move_overhead_ms() -> u64 {
    100
}
pub fn time_curve_midpoint() -> f32 {
    101.5
}
pub fn time_curve_steepness() -> f32 {
    6.8
}
pub fn syzygy_paths() -> Option<String> {
    None
}
