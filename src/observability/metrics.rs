//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_server_health_score` (gauge): latest score per server
//! - `fleet_server_load_score` (gauge): load score per server
//! - `fleet_health_checks_total` (counter): checks by status
//! - `fleet_health_batch_duration_seconds` (histogram): one `check_all` batch
//! - `fleet_config_applies_total` (counter): applies by outcome
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::model::Server;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_check(status: &'static str) {
    counter!("fleet_health_checks_total", "status" => status).increment(1);
}

pub fn record_server_scores(server: &Server, health_score: f64) {
    let id = server.id.to_string();
    gauge!(
        "fleet_server_health_score",
        "server_id" => id.clone(),
        "server_name" => server.name.clone(),
        "protocol" => server.protocol.to_string(),
        "location" => server.location.clone().unwrap_or_default()
    )
    .set(health_score);
    gauge!(
        "fleet_server_load_score",
        "server_id" => id,
        "server_name" => server.name.clone()
    )
    .set(server.load_score);
}

pub fn record_batch_duration(start: Instant) {
    histogram!("fleet_health_batch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_config_apply(outcome: &'static str) {
    counter!("fleet_config_applies_total", "outcome" => outcome).increment(1);
}
