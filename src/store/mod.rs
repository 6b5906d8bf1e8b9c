//! Persistence collaborator.
//!
//! # Data Flow
//! ```text
//! health monitor:
//!     list_servers(Active) → probe → commit_health_batch (scores + records + events, atomic)
//!
//! config applier:
//!     list_servers + list_tenant_access → synthesize
//!     → active_config (hash check) → insert_config (pending)
//!     → activate_config | fail_config
//! ```
//!
//! # Design Decisions
//! - The trait is the seam; storage mechanics live behind it
//! - Batch commits are all-or-nothing; a failed commit leaves no trace
//! - `memory.rs` keeps state in process and optionally snapshots it to JSON,
//!   with bounded history

pub mod memory;
pub mod watcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    GeneratedConfig, HealthCheckRecord, Server, ServerStatus, SystemEvent, TenantAccess,
};

pub use memory::{FleetState, MemoryStore, Retention};

/// Errors surfaced by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Mutations produced by one health-check batch.
#[derive(Debug, Clone, Default)]
pub struct HealthBatch {
    /// `(server id, fresh health score)`.
    pub scores: Vec<(Uuid, f64)>,
    pub records: Vec<HealthCheckRecord>,
    pub events: Vec<SystemEvent>,
}

/// CRUD-style access to fleet state.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Servers, optionally filtered by lifecycle status, in insertion order.
    async fn list_servers(&self, status: Option<ServerStatus>) -> StoreResult<Vec<Server>>;

    async fn get_server(&self, id: Uuid) -> StoreResult<Option<Server>>;

    async fn set_server_status(&self, id: Uuid, status: ServerStatus) -> StoreResult<Server>;

    /// Overwrite the operator-maintained load score.
    async fn set_load_score(&self, id: Uuid, load_score: f64) -> StoreResult<Server>;

    /// Apply every mutation in `batch` or none of them.
    async fn commit_health_batch(&self, batch: HealthBatch) -> StoreResult<()>;

    /// Newest first.
    async fn health_history(&self, server_id: Uuid, limit: usize) -> StoreResult<Vec<HealthCheckRecord>>;

    async fn record_event(&self, event: SystemEvent) -> StoreResult<()>;

    /// Credentials of active tenants, in credential order.
    async fn list_tenant_access(&self) -> StoreResult<Vec<TenantAccess>>;

    async fn active_config(&self) -> StoreResult<Option<GeneratedConfig>>;

    async fn insert_config(&self, record: GeneratedConfig) -> StoreResult<()>;

    /// Mark `id` active and any previously active record inactive.
    async fn activate_config(&self, id: Uuid, applied_at: DateTime<Utc>) -> StoreResult<()>;

    async fn fail_config(&self, id: Uuid) -> StoreResult<()>;

    /// Newest first.
    async fn config_history(&self, limit: usize) -> StoreResult<Vec<GeneratedConfig>>;
}
