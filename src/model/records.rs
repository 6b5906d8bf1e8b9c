//! Append-only facts written by the health monitor and config applier.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One health probe sample for a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub server_id: Uuid,
    pub latency_ms: Option<u64>,
    pub score: f64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckRecord {
    pub fn is_successful(&self) -> bool {
        self.error.is_none() && self.latency_ms.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Audit record consumed by external observability tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub event_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SystemEvent {
    pub fn new(event_type: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            message: message.into(),
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    Pending,
    Active,
    Inactive,
    Failed,
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigStatus::Pending => "pending",
            ConfigStatus::Active => "active",
            ConfigStatus::Inactive => "inactive",
            ConfigStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A synthesized daemon configuration and its lifecycle.
///
/// ```text
/// pending → active → inactive
///    └────→ failed
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedConfig {
    pub id: Uuid,
    pub hash: String,
    pub document: serde_json::Value,
    pub status: ConfigStatus,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl GeneratedConfig {
    pub fn pending(hash: impl Into<String>, document: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            hash: hash.into(),
            document,
            status: ConfigStatus::Pending,
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConfigStatus::Active
    }
}
