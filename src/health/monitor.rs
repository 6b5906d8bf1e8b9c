//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every active server
//! - Score each probe and persist scores, history and threshold events
//! - Keep one server's failure from touching any other server's result

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time;
use uuid::Uuid;

use crate::config::HealthCheckConfig;
use crate::health::probe::{Prober, TcpProber, PROBE_TIMEOUT};
use crate::health::scoring;
use crate::model::{HealthCheckRecord, Protocol, Server, ServerStatus, Severity, SystemEvent};
use crate::observability::metrics;
use crate::store::{FleetStore, HealthBatch, StoreError, StoreResult};

/// Scores below this raise a critical event.
pub const CRITICAL_THRESHOLD: f64 = 30.0;

/// Scores below this (and not critical) raise a warning event.
pub const WARNING_THRESHOLD: f64 = 50.0;

/// Slack on top of the probe timeout before a unit of work is abandoned.
const CHECK_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    Error,
    Unsupported,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Healthy => "healthy",
            CheckStatus::Unhealthy => "unhealthy",
            CheckStatus::Error => "error",
            CheckStatus::Unsupported => "unsupported",
        }
    }
}

/// Outcome of checking one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub server_id: Uuid,
    pub server_name: String,
    pub protocol: Protocol,
    pub location: Option<String>,
    pub status: CheckStatus,
    pub score: f64,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl CheckResult {
    fn for_server(server: &Server, status: CheckStatus, score: f64) -> Self {
        Self {
            server_id: server.id,
            server_name: server.name.clone(),
            protocol: server.protocol.clone(),
            location: server.location.clone(),
            status,
            score,
            latency_ms: None,
            error: None,
        }
    }

    /// A check that faulted before producing a measurement.
    pub fn error(server: &Server, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::for_server(server, CheckStatus::Error, 0.0)
        }
    }
}

/// Probes servers and records their health.
#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn FleetStore>,
    prober: Arc<dyn Prober>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn FleetStore>, config: HealthCheckConfig) -> Self {
        Self {
            store,
            prober: Arc::new(TcpProber::new()),
            config,
        }
    }

    /// Replace the TCP prober.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_active().await {
                        Ok(results) => tracing::info!(checked = results.len(), "Health check cycle complete"),
                        Err(e) => tracing::error!(error = %e, "Failed to list active servers"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Check every lifecycle-active server in the store.
    pub async fn check_active(&self) -> StoreResult<Vec<CheckResult>> {
        let servers = self.store.list_servers(Some(ServerStatus::Active)).await?;
        Ok(self.check_all(&servers).await)
    }

    /// Probe and score one server without persisting anything.
    pub async fn check_one(&self, server: &Server) -> CheckResult {
        let measured = self
            .prober
            .probe(&server.protocol, &server.address, server.port, PROBE_TIMEOUT)
            .await;

        match measured {
            Ok(m) => {
                let score = scoring::score(m.latency_ms, m.succeeded);
                let status = if m.succeeded {
                    CheckStatus::Healthy
                } else {
                    CheckStatus::Unhealthy
                };
                CheckResult {
                    latency_ms: m.latency_ms,
                    error: m.failure.map(|e| e.to_string()),
                    ..CheckResult::for_server(server, status, score)
                }
            }
            Err(unsupported) => {
                tracing::warn!(server = %server.name, protocol = %server.protocol, "No probe for protocol");
                CheckResult {
                    error: Some(unsupported.to_string()),
                    ..CheckResult::for_server(server, CheckStatus::Unsupported, 0.0)
                }
            }
        }
    }

    /// Check `servers` concurrently, then commit all results as one batch.
    ///
    /// Results are returned in input order even if the commit fails.
    pub async fn check_all(&self, servers: &[Server]) -> Vec<CheckResult> {
        if servers.is_empty() {
            tracing::info!("No active servers to check");
            return Vec::new();
        }

        tracing::info!(servers = servers.len(), "Checking server health");
        let start = Instant::now();
        let deadline = PROBE_TIMEOUT + CHECK_GRACE;

        let tasks: Vec<_> = servers
            .iter()
            .cloned()
            .map(|server| {
                let monitor = self.clone();
                tokio::spawn(async move { time::timeout(deadline, monitor.check_one(&server)).await })
            })
            .collect();

        let outcomes = join_all(tasks).await;

        let results: Vec<CheckResult> = servers
            .iter()
            .zip(outcomes)
            .map(|(server, outcome)| match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    tracing::warn!(server = %server.name, "Health check abandoned after deadline");
                    CheckResult::error(server, format!("health check exceeded {:?}", deadline))
                }
                Err(e) => {
                    tracing::error!(server = %server.name, error = %e, "Health check task failed");
                    CheckResult::error(server, format!("health check aborted: {}", e))
                }
            })
            .collect();

        for (server, result) in servers.iter().zip(&results) {
            metrics::record_check(result.status.as_str());
            metrics::record_server_scores(server, result.score);
        }

        let batch = build_batch(servers, &results);
        match self.store.commit_health_batch(batch).await {
            Ok(()) => tracing::info!(servers = results.len(), "Health check results committed"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to commit health check results");
                self.report_persistence_failure(&e, results.len()).await;
            }
        }

        metrics::record_batch_duration(start);
        results
    }

    async fn report_persistence_failure(&self, error: &StoreError, count: usize) {
        let event = SystemEvent::new(
            "health_persistence_failed",
            Severity::Error,
            format!("Failed to commit health check results for {} servers: {}", count, error),
        )
        .with_metadata(json!({ "servers": count, "error": error.to_string() }));

        if let Err(e) = self.store.record_event(event).await {
            tracing::error!(error = %e, "Failed to record persistence failure event");
        }
    }
}

/// Scores, history records and threshold events for one batch.
fn build_batch(servers: &[Server], results: &[CheckResult]) -> HealthBatch {
    let checked_at = Utc::now();
    let mut batch = HealthBatch::default();

    for (server, result) in servers.iter().zip(results) {
        batch.scores.push((server.id, result.score));
        batch.records.push(HealthCheckRecord {
            server_id: server.id,
            latency_ms: result.latency_ms,
            score: result.score,
            error: result.error.clone(),
            checked_at,
        });
        if let Some(event) = threshold_event(server, result) {
            batch.events.push(event);
        }
    }

    batch
}

fn threshold_event(server: &Server, result: &CheckResult) -> Option<SystemEvent> {
    let (severity, message) = if result.score < CRITICAL_THRESHOLD {
        (
            Severity::Critical,
            format!("Server {} health critically low: {}%", server.name, result.score),
        )
    } else if result.score < WARNING_THRESHOLD {
        (
            Severity::Warning,
            format!("Server {} health degraded: {}%", server.name, result.score),
        )
    } else {
        return None;
    };

    let metadata = json!({
        "server_id": server.id.to_string(),
        "server_name": server.name,
        "protocol": server.protocol.as_str(),
        "location": server.location,
        "status": result.status,
        "score": result.score,
        "latency_ms": result.latency_ms,
        "error": result.error,
    });

    Some(SystemEvent::new("server_health", severity, message).with_metadata(metadata))
}
