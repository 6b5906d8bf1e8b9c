//! Weighted-random load balancing strategy.
//!
//! Weights are health scores. A draw in `[0, total)` walks cumulative
//! weights in candidate order; a zero total falls back to a uniform pick.

use rand::Rng;

use crate::load_balancer::SelectionStrategy;
use crate::model::Server;

#[derive(Debug, Default)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for WeightedRandom {
    fn pick<'a>(&self, candidates: &[&'a Server]) -> Option<&'a Server> {
        pick_with(candidates, &mut rand::thread_rng())
    }
}

fn weight(server: &Server) -> f64 {
    server.health_score.max(0.0)
}

/// Weighted pick using `rng`.
pub fn pick_with<'a, R: Rng>(candidates: &[&'a Server], rng: &mut R) -> Option<&'a Server> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|s| weight(s)).sum();
    if total <= 0.0 {
        return Some(candidates[rng.gen_range(0..candidates.len())]);
    }

    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for server in candidates {
        cumulative += weight(server);
        if cumulative > draw {
            return Some(*server);
        }
    }

    // Float rounding can leave the draw past the final sum.
    candidates.iter().rev().find(|s| weight(s) > 0.0).copied()
}
