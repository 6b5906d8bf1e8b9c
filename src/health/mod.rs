//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! monitor.rs:
//!     Periodic timer (or on-demand check_all)
//!     → probe.rs per server, concurrently
//!     → scoring.rs turns the measurement into 0..=100
//!     → one batch commit to the store
//!
//! state.rs:
//!     Fleet snapshot → no_servers | critical | degraded | healthy
//! ```
//!
//! # Design Decisions
//! - Scoring is pure; all persistence happens in the monitor
//! - A probe never fails its siblings; faults become per-server results
//! - Thresholds are constants, not per-server configuration

pub mod monitor;
pub mod probe;
pub mod scoring;
pub mod state;

pub use monitor::{CheckResult, CheckStatus, HealthMonitor};
pub use probe::{Measurement, ProbeError, ProbeKind, Prober, TcpProber, UnsupportedProtocol};
pub use state::{FleetHealth, HealthState};
