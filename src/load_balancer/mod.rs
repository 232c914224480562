//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → pool.rs (select under the shared lock)
//!     → round_robin.rs (scan from cursor, skip non-healthy, advance cursor)
//!     → backend.rs (forward: in-flight guard → rewrite → upstream)
//!     → Return streamed response or error
//!
//! Registration:
//!     pool.add → first probe → heartbeat loop per backend
//!     pool.remove → detach from sequence → close → drain in-flight
//! ```
//!
//! # Design Decisions
//! - Structural lock (sequence + cursor) is separate from per-backend status locks
//! - Only `Healthy` backends are selectable; `Initial` waits for its first probe
//! - Drain waits happen outside the structural lock

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, BackendError, BackendId, BackendOrigin, ForwardError, HttpClient};
pub use pool::{BackendPool, PoolError};
