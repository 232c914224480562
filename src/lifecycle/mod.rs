//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Register backends (probe + heartbeat) → Start listeners
//!
//! Reload (startup.rs::reconcile):
//!     New config → remove (drain) dropped targets → add new targets
//!
//! Shutdown (shutdown.rs + signals.rs):
//!     SIGTERM/SIGINT → broadcast → listeners stop accepting → Exit
//! ```
//!
//! # Design Decisions
//! - Listeners start last (traffic only once backends have been probed)
//! - Process shutdown does not drain backends; only removal does

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
