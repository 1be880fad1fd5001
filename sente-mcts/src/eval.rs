//! Evaluator interface consumed by the search core.
//!
//! The evaluator is an external collaborator (a neural network in the real
//! engine). Implementations are invoked concurrently by the worker pool and
//! must either be thread-safe or serialize internally.

use rustc_hash::FxHashMap;
use sente_core::{Move, Position};
use thiserror::Error;

/// A single network evaluation.
///
/// - `policy[m]` is an unnormalized weight for move `m`. Moves absent from
///   the map are treated as weight zero.
/// - `value` is in `[0, 1]` from the perspective of the side to move.
#[derive(Debug, Clone)]
pub struct NetOutput {
    pub policy: FxHashMap<Move, f32>,
    pub value: f32,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator unavailable: {0}")]
    Unavailable(String),
    #[error("malformed evaluator output: {0}")]
    Malformed(String),
}

/// Policy/value evaluation of a position. Fatal on failure: the search
/// aborts rather than continue on partial data.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, pos: &Position) -> Result<NetOutput, EvalError>;
}

/// Equal weight on every legal move, value 0.5 (baseline stub).
pub struct UniformEvaluator;

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, pos: &Position) -> Result<NetOutput, EvalError> {
        let moves = pos.legal_moves();
        let w = 1.0 / moves.len() as f32;
        let mut policy = FxHashMap::default();
        for mv in moves {
            policy.insert(mv, w);
        }
        Ok(NetOutput { policy, value: 0.5 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_policy_covers_legal_moves() {
        let pos = Position::new(9, 7.5);
        let out = UniformEvaluator.evaluate(&pos).unwrap();
        assert_eq!(out.policy.len(), 82);
        assert_eq!(out.value, 0.5);
        let w = 1.0 / 82.0;
        assert!(out
            .policy
            .values()
            .all(|&p| (p - w).abs() < f32::EPSILON));
        assert!(out.policy.contains_key(&Move::Pass));
    }
}
