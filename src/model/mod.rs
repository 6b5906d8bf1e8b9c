//! Fleet data model.
//!
//! # Ownership
//! ```text
//! Server.health_score     ← health monitor only
//! Server (everything else) ← operator layer
//! HealthCheckRecord       ← health monitor, append-only
//! SystemEvent             ← health monitor + config applier, write-only
//! GeneratedConfig         ← config applier, append + status update
//! Tenant / TenantCredential ← read-only input to synthesis
//! ```

pub mod records;
pub mod server;
pub mod tenant;

pub use records::{ConfigStatus, GeneratedConfig, HealthCheckRecord, Severity, SystemEvent};
pub use server::{Protocol, Server, ServerStatus, HEALTHY_FLOOR};
pub use tenant::{Tenant, TenantAccess, TenantCredential, TenantStatus, PRIVILEGED_TIER};
