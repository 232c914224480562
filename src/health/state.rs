//! Backend health state machine.
//!
//! # States
//! - Initial: registered, not probed yet, receives no traffic
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//! - Closed: removed from the pool, terminal
//!
//! # State Transitions
//! ```text
//! Initial → Healthy | Unhealthy      (first probe)
//! Healthy ⇄ Unhealthy                (every probe)
//! any → Closed                       (removal, exactly once)
//! ```

use std::fmt;

use serde::Serialize;

/// Lifecycle status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Initial,
    Healthy,
    Unhealthy,
    Closed,
}

impl BackendStatus {
    /// Status a probe result maps to.
    pub fn from_probe(healthy: bool) -> Self {
        if healthy {
            BackendStatus::Healthy
        } else {
            BackendStatus::Unhealthy
        }
    }

    pub fn is_closed(self) -> bool {
        self == BackendStatus::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendStatus::Initial => "initial",
            BackendStatus::Healthy => "healthy",
            BackendStatus::Unhealthy => "unhealthy",
            BackendStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
