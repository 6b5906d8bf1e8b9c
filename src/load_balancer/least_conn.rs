//! Least-connections load balancing strategy.

use crate::load_balancer::SelectionStrategy;
use crate::model::Server;

/// Least connections selector.
/// Selects the candidate with the lowest load score.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn pick<'a>(&self, candidates: &[&'a Server]) -> Option<&'a Server> {
        // In case of tie, the first one is selected (stability)
        candidates
            .iter()
            .copied()
            .min_by(|a, b| a.load_score.total_cmp(&b.load_score))
    }
}
