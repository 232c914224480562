//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Backend, pool::PoolError};

/// Round-robin selector.
/// Stores the cursor: the slot the next scan starts from.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Return the first healthy backend at or after the cursor and move the
    /// cursor just past it.
    ///
    /// Callers hold the pool's shared lock, so `backends` cannot change while
    /// racing selects compete for the cursor. The cursor only advances if it
    /// still holds the value the scan started from; otherwise the scan is
    /// repeated from the new position.
    pub fn next_server(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, PoolError> {
        let len = backends.len();
        if len == 0 {
            return Err(PoolError::NoBackendsRegistered);
        }

        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            let start = current % len;
            let found = (0..len)
                .map(|offset| (start + offset) % len)
                .find(|&index| backends[index].is_healthy());

            let Some(index) = found else {
                return Err(PoolError::NoBackendAvailable);
            };

            match self.cursor.compare_exchange(
                current,
                (index + 1) % len,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(backends[index].clone()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Keep the cursor on the same logical backend after the entry at
    /// `removed` is taken out. Must be called under the pool's exclusive lock.
    pub(crate) fn on_removed(&self, removed: usize, remaining: usize) {
        let current = self.cursor.load(Ordering::Acquire);
        let shifted = if removed < current { current - 1 } else { current };
        let next = if remaining == 0 { 0 } else { shifted % remaining };
        self.cursor.store(next, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::testing::static_backend;

    async fn backends(health: &[bool]) -> Vec<Arc<Backend>> {
        let mut out = Vec::new();
        for (i, healthy) in health.iter().enumerate() {
            let backend = Arc::new(static_backend(&format!("http://127.0.0.1:{}", 8080 + i), *healthy));
            backend.check_healthy().await;
            out.push(backend);
        }
        out
    }

    #[tokio::test]
    async fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = backends(&[true, true]).await;

        let s1 = lb.next_server(&backends).unwrap();
        assert_eq!(s1.id(), backends[0].id());

        let s2 = lb.next_server(&backends).unwrap();
        assert_eq!(s2.id(), backends[1].id());

        let s3 = lb.next_server(&backends).unwrap();
        assert_eq!(s3.id(), backends[0].id());
    }

    #[tokio::test]
    async fn skips_unhealthy_and_advances_past_pick() {
        let lb = RoundRobin::new();
        let backends = backends(&[true, false, true]).await;

        assert_eq!(lb.next_server(&backends).unwrap().id(), backends[0].id());
        assert_eq!(lb.cursor(), 1);
        assert_eq!(lb.next_server(&backends).unwrap().id(), backends[2].id());
        assert_eq!(lb.cursor(), 0);
        assert_eq!(lb.next_server(&backends).unwrap().id(), backends[0].id());
    }

    #[tokio::test]
    async fn empty_and_all_unhealthy_are_distinct() {
        let lb = RoundRobin::new();
        assert!(matches!(lb.next_server(&[]), Err(PoolError::NoBackendsRegistered)));

        let backends = backends(&[false, false]).await;
        assert!(matches!(lb.next_server(&backends), Err(PoolError::NoBackendAvailable)));
        assert_eq!(lb.cursor(), 0, "failed scan leaves the cursor alone");
    }

    #[test]
    fn cursor_follows_removals() {
        let lb = RoundRobin::new();
        lb.cursor.store(2, Ordering::Release);

        // Removing an earlier slot shifts the cursor back onto the same backend.
        lb.on_removed(0, 3);
        assert_eq!(lb.cursor(), 1);

        // Removing the slot under the cursor leaves it on the successor,
        // wrapping when that was the last slot.
        lb.on_removed(1, 1);
        assert_eq!(lb.cursor(), 0);

        lb.on_removed(0, 0);
        assert_eq!(lb.cursor(), 0);
    }
}
