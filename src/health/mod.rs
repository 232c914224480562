//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Backend heartbeat (load_balancer/backend.rs):
//!     sleep(checker.interval())
//!     → HealthChecker::is_healthy() (active.rs probes GET /health)
//!     → status stored under the backend's lock (state.rs)
//! ```
//!
//! # Design Decisions
//! - A failed probe is a signal, not an error: checkers only return bool
//! - Checkers never touch pool or backend state; the backend applies the result
//! - Health state is per-backend, not per-pool

use std::time::Duration;

use futures_util::future::BoxFuture;

pub mod active;
pub mod state;

pub use active::HttpHealthChecker;
pub use state::BackendStatus;

/// Reachability probe for a single upstream target.
///
/// Implementations must bound the time spent in [`HealthChecker::is_healthy`]
/// so that a hung upstream cannot stall the heartbeat loop that calls it.
pub trait HealthChecker: Send + Sync {
    /// Probe the target. Any transport error, timeout or non-success
    /// status yields `false`.
    fn is_healthy(&self) -> BoxFuture<'_, bool>;

    /// Fixed delay between two consecutive probes.
    fn interval(&self) -> Duration;
}
