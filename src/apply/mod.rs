//! Config apply subsystem.
//!
//! # State Transitions
//! ```text
//! apply():
//!     guard (reject if held)
//!     → synthesize + hash
//!     → hash == active hash?  → Unchanged
//!     → validate              → Err(Validation), nothing stored
//!     → insert pending record
//!     → write live file       → record failed on error
//!     → reload service        → record failed on error
//!     → record active, previous active → inactive
//! ```
//!
//! # Design Decisions
//! - One compare-and-swap guard covers apply and restore
//! - The live file is overwritten before reload succeeds; on reload failure
//!   the file and the active record disagree until the next good apply

pub mod applier;
pub mod backup;
pub mod reload;

pub use applier::{ApplyError, ApplyOutcome, ConfigApplier};
pub use reload::{CommandReloader, ReloadError, ServiceReloader};
