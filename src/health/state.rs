//! Fleet-wide health summary.
//!
//! # States
//! ```text
//! no_servers: no lifecycle-active servers
//! critical:   none of them healthy
//! degraded:   healthy share below 50%
//! healthy:    otherwise
//! ```

use serde::Serialize;

use crate::model::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    NoServers,
    Critical,
    Degraded,
    Healthy,
}

/// Counts over the lifecycle-active servers of a fleet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetHealth {
    pub state: HealthState,
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub health_percentage: f64,
}

impl FleetHealth {
    /// Summarize `servers`; non-active servers are ignored.
    pub fn summarize(servers: &[Server]) -> Self {
        let active: Vec<&Server> = servers.iter().filter(|s| s.is_active()).collect();
        let total = active.len();
        let healthy = active.iter().filter(|s| s.is_healthy()).count();

        let health_percentage = if total == 0 {
            0.0
        } else {
            (healthy as f64 / total as f64 * 10_000.0).round() / 100.0
        };

        let state = if total == 0 {
            HealthState::NoServers
        } else if healthy == 0 {
            HealthState::Critical
        } else if health_percentage < 50.0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        Self {
            state,
            total,
            healthy,
            unhealthy: total - healthy,
            health_percentage,
        }
    }
}
