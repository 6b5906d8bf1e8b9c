//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Caller's server snapshot + tenant tier
//!     → healthy active servers (else all active, else none)
//!     → tier >= 2: narrow to score >= 80 when that set is non-empty
//!     → Apply the configured strategy:
//!         - round_robin.rs (rotate through candidates)
//!         - weighted.rs (random draw weighted by health score)
//!         - least_conn.rs (lowest load score)
//!         - health_based.rs (highest health score, also used for latency_based)
//!     → Selected server or None
//! ```
//!
//! # Design Decisions
//! - Selection never touches the store; callers pass the snapshot in
//! - Strategy names are resolved once, at construction
//! - The round-robin cursor is the only state kept across calls

pub mod health_based;
pub mod least_conn;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{Server, PRIVILEGED_TIER};

pub use health_based::HealthBased;
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRandom;

/// Health score privileged tenants are narrowed to, when possible.
pub const PREMIUM_FLOOR: f64 = 80.0;

/// Picks one server from an already-filtered candidate set.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    fn pick<'a>(&self, candidates: &[&'a Server]) -> Option<&'a Server>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    WeightedRandom,
    LeastConnections,
    HealthBased,
    /// Same selection as `HealthBased`; latency history is not consulted.
    LatencyBased,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::WeightedRandom => "weighted_random",
            Strategy::LeastConnections => "least_connections",
            Strategy::HealthBased => "health_based",
            Strategy::LatencyBased => "latency_based",
        }
    }

    /// Resolve a configured name, falling back to `WeightedRandom`.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(strategy = name, "Unknown load balancing strategy, using weighted_random");
            Strategy::WeightedRandom
        })
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::WeightedRandom
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "weighted_random" => Ok(Strategy::WeightedRandom),
            "least_connections" => Ok(Strategy::LeastConnections),
            "health_based" => Ok(Strategy::HealthBased),
            "latency_based" => Ok(Strategy::LatencyBased),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Server selection with one strategy fixed for its lifetime.
#[derive(Debug)]
pub struct ServerSelector {
    strategy: Strategy,
    picker: Box<dyn SelectionStrategy>,
}

impl ServerSelector {
    pub fn new(strategy: Strategy) -> Self {
        let picker: Box<dyn SelectionStrategy> = match strategy {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::WeightedRandom => Box::new(WeightedRandom::new()),
            Strategy::LeastConnections => Box::new(LeastConnections::new()),
            Strategy::HealthBased | Strategy::LatencyBased => Box::new(HealthBased::new()),
        };
        Self { strategy, picker }
    }

    /// Build from a configured strategy name; unknown names use weighted_random.
    pub fn from_name(name: &str) -> Self {
        Self::new(Strategy::from_name(name))
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick a server for a tenant of `tier`, or `None` if no server is active.
    pub fn select<'a>(&self, candidates: &'a [Server], tier: u32) -> Option<&'a Server> {
        let pool = eligible(candidates, tier);
        if pool.is_empty() {
            tracing::warn!("No active servers available for selection");
            return None;
        }
        self.picker.pick(&pool)
    }
}

/// The candidate set after the health and tier filters.
pub fn eligible(candidates: &[Server], tier: u32) -> Vec<&Server> {
    let mut pool: Vec<&Server> = candidates.iter().filter(|s| s.is_available()).collect();
    if pool.is_empty() {
        pool = candidates.iter().filter(|s| s.is_active()).collect();
    }

    if tier >= PRIVILEGED_TIER {
        let premium: Vec<&Server> = pool
            .iter()
            .copied()
            .filter(|s| s.health_score >= PREMIUM_FLOOR)
            .collect();
        if !premium.is_empty() {
            pool = premium;
        }
    }

    pool
}
