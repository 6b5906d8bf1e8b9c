//! Proxy fleet health and configuration engine.
//!
//! Probes a fleet of proxy servers, scores their health, picks servers for
//! tenants, and keeps the proxy daemon's configuration in sync with the
//! fleet and tenant state.

pub mod apply;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod model;
pub mod observability;
pub mod store;
pub mod synth;

pub use apply::{ApplyError, ApplyOutcome, ConfigApplier};
pub use config::FleetConfig;
pub use health::{CheckResult, CheckStatus, HealthMonitor};
pub use lifecycle::Shutdown;
pub use load_balancer::{ServerSelector, Strategy};
pub use store::{FleetStore, MemoryStore};
