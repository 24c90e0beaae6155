//! Network evaluation contract.
//!
//! The search is generic over the network backend: anything that can
//! batch-evaluate encoded positions into a value and a policy works. The
//! backend is handed the policy indices of the moves it will be asked
//! about, so it can restrict its softmax to legal moves.
//!
//! [`UniformNetwork`] is the backend used by tests and benches: value
//! zero everywhere, priors uniform over the legal moves. Search driven
//! by it degenerates to plain UCT, which is exactly what deterministic
//! tests want.

use thiserror::Error;

use crate::encoder::InputPlane;

/// Errors from the network backend.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("weights could not be loaded: {0}")]
    LoadFailed(String),
    #[error("network evaluation failed: {0}")]
    EvaluationFailed(String),
}

/// One batched evaluation request. Created per search iteration, filled
/// with inputs, computed once, then read back by input index.
pub trait NetworkComputation: Send {
    /// Queue a position. `moves` lists the policy indices the caller
    /// will later query via [`NetworkComputation::p`].
    fn add_input(&mut self, planes: Vec<InputPlane>, moves: Vec<u16>);

    /// Number of queued inputs.
    fn batch_size(&self) -> usize;

    /// Run the network on everything queued. Exactly one call per
    /// computation.
    fn compute_blocking(&mut self) -> Result<(), NetworkError>;

    /// Value head output for input `index`, from the side to move's
    /// perspective, in [-1, 1].
    fn q(&self, index: usize) -> f32;

    /// Policy head output for input `index` and policy slot `move_index`.
    fn p(&self, index: usize, move_index: u16) -> f32;
}

/// A loaded network able to mint computations.
pub trait Network: Send + Sync {
    fn new_computation(&self) -> Box<dyn NetworkComputation>;
}

/// Test and fallback backend: neutral values, uniform priors.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformNetwork;

impl UniformNetwork {
    pub fn new() -> Self {
        Self
    }
}

impl Network for UniformNetwork {
    fn new_computation(&self) -> Box<dyn NetworkComputation> {
        Box::new(UniformComputation { inputs: Vec::new() })
    }
}

struct UniformComputation {
    inputs: Vec<Vec<u16>>,
}

impl NetworkComputation for UniformComputation {
    fn add_input(&mut self, _planes: Vec<InputPlane>, moves: Vec<u16>) {
        self.inputs.push(moves);
    }

    fn batch_size(&self) -> usize {
        self.inputs.len()
    }

    fn compute_blocking(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    fn q(&self, _index: usize) -> f32 {
        0.0
    }

    fn p(&self, index: usize, move_index: u16) -> f32 {
        let moves = &self.inputs[index];
        if moves.iter().any(|&m| m == move_index) {
            1.0 / moves.len().max(1) as f32
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_network_spreads_policy_over_listed_moves() {
        let network = UniformNetwork::new();
        let mut computation = network.new_computation();
        computation.add_input(Vec::new(), vec![10, 20, 30, 40]);
        computation.add_input(Vec::new(), vec![5]);
        assert_eq!(computation.batch_size(), 2);
        computation.compute_blocking().unwrap();

        assert_eq!(computation.q(0), 0.0);
        assert!((computation.p(0, 20) - 0.25).abs() < 1e-6);
        assert_eq!(computation.p(0, 99), 0.0);
        assert!((computation.p(1, 5) - 1.0).abs() < 1e-6);
    }
}
