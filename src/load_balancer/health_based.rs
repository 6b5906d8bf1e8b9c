//! Highest-health load balancing strategy.
//!
//! Also serves `latency_based`: health scores already fold latency in,
//! and no latency history is consulted.

use crate::load_balancer::SelectionStrategy;
use crate::model::Server;

#[derive(Debug, Default)]
pub struct HealthBased;

impl HealthBased {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for HealthBased {
    fn pick<'a>(&self, candidates: &[&'a Server]) -> Option<&'a Server> {
        // Ties go to the first candidate.
        candidates.iter().copied().reduce(|best, s| {
            if s.health_score > best.health_score {
                s
            } else {
                best
            }
        })
    }
}
