//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the ordered set of registered backends
//! - Apply round-robin selection restricted to healthy backends
//! - Register and remove backends, draining on removal
//!
//! # Lock discipline
//! - The sequence is guarded by one `RwLock`; selects share it, add/remove
//!   take it exclusively and only for the structural change
//! - Health probes and drains always run after the lock is released

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::load_balancer::{
    backend::{Backend, BackendId},
    round_robin::RoundRobin,
};

/// Pool-level errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is empty.
    #[error("no backends registered")]
    NoBackendsRegistered,

    /// Backends exist but none is healthy.
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend {0} is already registered")]
    AlreadyRegistered(BackendId),

    #[error("backend {0} is closed and cannot be registered")]
    BackendClosed(BackendId),
}

/// The live, ordered set of backends plus the round-robin cursor.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
    balancer: RoundRobin,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `backend`, run one health check and start its heartbeat.
    ///
    /// The backend is visible to `select` as soon as the first probe marks it
    /// healthy.
    pub async fn add(&self, backend: Arc<Backend>) -> Result<(), PoolError> {
        if backend.status().is_closed() {
            return Err(PoolError::BackendClosed(backend.id()));
        }

        {
            let mut backends = self.backends.write();
            if backends.iter().any(|b| b.id() == backend.id()) {
                return Err(PoolError::AlreadyRegistered(backend.id()));
            }
            backends.push(backend.clone());
        }

        tracing::info!(backend = %backend.id(), target = %backend.target(), "Backend registered");

        let status = backend.check_healthy().await;
        backend.start_heartbeat();

        tracing::debug!(backend = %backend.id(), status = %status, "Initial health check complete");
        Ok(())
    }

    /// Pick the next healthy backend in round-robin order.
    pub fn select(&self) -> Result<Arc<Backend>, PoolError> {
        let backends = self.backends.read();
        self.balancer.next_server(&backends)
    }

    /// Remove `backend` and wait for its in-flight forwards to drain.
    /// Returns `false` if it was not registered.
    pub async fn remove(&self, backend: &Backend) -> bool {
        self.remove_id(backend.id()).await.is_some()
    }

    /// Remove the backend with `id`, then close and drain it outside the
    /// pool lock.
    pub async fn remove_id(&self, id: BackendId) -> Option<Arc<Backend>> {
        let removed = self.detach(id)?;

        tracing::info!(backend = %removed.id(), target = %removed.target(), "Backend removed from pool");
        removed.close().await;
        Some(removed)
    }

    fn detach(&self, id: BackendId) -> Option<Arc<Backend>> {
        let mut backends = self.backends.write();
        let index = backends.iter().position(|b| b.id() == id)?;
        let removed = backends.remove(index);
        self.balancer.on_removed(index, backends.len());
        Some(removed)
    }

    pub fn get(&self, id: BackendId) -> Option<Arc<Backend>> {
        self.backends.read().iter().find(|b| b.id() == id).cloned()
    }

    /// Snapshot of the registered backends in selection order.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().clone()
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.read().iter().filter(|b| b.is_healthy()).count()
    }

    /// Sum of live connections across registered backends. Advisory only:
    /// counters move independently of the read.
    pub fn total_connections(&self) -> usize {
        self.backends.read().iter().map(|b| b.connections()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::BackendStatus;
    use crate::load_balancer::testing::{static_backend, StaticChecker};
    use std::time::Duration;
    use url::Url;

    async fn pool_with(health: &[bool]) -> (BackendPool, Vec<Arc<Backend>>) {
        let pool = BackendPool::new();
        let mut backends = Vec::new();
        for (i, healthy) in health.iter().enumerate() {
            let backend = Arc::new(static_backend(&format!("http://127.0.0.1:{}", 9000 + i), *healthy));
            pool.add(backend.clone()).await.unwrap();
            backends.push(backend);
        }
        (pool, backends)
    }

    #[tokio::test]
    async fn empty_pool_reports_no_backends_registered() {
        let pool = BackendPool::new();
        assert_eq!(pool.select().unwrap_err(), PoolError::NoBackendsRegistered);
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn healthy_backends_are_visited_in_insertion_order() {
        let (pool, backends) = pool_with(&[true, true, true, true]).await;

        for _round in 0..2 {
            for expected in &backends {
                assert_eq!(pool.select().unwrap().id(), expected.id());
            }
        }
    }

    #[tokio::test]
    async fn all_unhealthy_reports_no_backend_available() {
        let (pool, _) = pool_with(&[false, false]).await;
        assert_eq!(pool.select().unwrap_err(), PoolError::NoBackendAvailable);
    }

    #[tokio::test]
    async fn skips_unhealthy_middle_backend() {
        let (pool, b) = pool_with(&[true, false, true]).await;

        assert_eq!(pool.select().unwrap().id(), b[0].id());
        assert_eq!(pool.select().unwrap().id(), b[2].id());
        assert_eq!(pool.select().unwrap().id(), b[0].id());
    }

    #[tokio::test]
    async fn single_backend_recovers_after_flip() {
        let checker = Arc::new(StaticChecker::new(false));
        let backend = Arc::new(Backend::new(Url::parse("http://127.0.0.1:9100").unwrap(), checker.clone()).unwrap());
        let pool = BackendPool::new();
        pool.add(backend.clone()).await.unwrap();

        assert_eq!(pool.select().unwrap_err(), PoolError::NoBackendAvailable);

        checker.set_healthy(true);
        backend.check_healthy().await;
        assert_eq!(pool.select().unwrap().id(), backend.id());
    }

    #[tokio::test]
    async fn duplicate_and_closed_backends_are_rejected() {
        let (pool, b) = pool_with(&[true]).await;
        assert_eq!(pool.add(b[0].clone()).await, Err(PoolError::AlreadyRegistered(b[0].id())));

        let closed = Arc::new(static_backend("http://127.0.0.1:9200", true));
        closed.close().await;
        assert_eq!(pool.add(closed.clone()).await, Err(PoolError::BackendClosed(closed.id())));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn removed_backend_is_never_selected_again() {
        let (pool, b) = pool_with(&[true, true]).await;

        assert!(pool.remove(&b[0]).await);
        assert_eq!(b[0].status(), BackendStatus::Closed);
        for _ in 0..4 {
            assert_eq!(pool.select().unwrap().id(), b[1].id());
        }

        // Same target again gets a fresh identity.
        let again = Arc::new(static_backend(b[0].target().as_str(), true));
        assert_ne!(again.id(), b[0].id());
        pool.add(again.clone()).await.unwrap();
        for _ in 0..4 {
            assert_ne!(pool.select().unwrap().id(), b[0].id());
        }

        assert!(!pool.remove(&b[0]).await, "second removal is a no-op");
    }

    #[tokio::test]
    async fn removal_keeps_rotation_fair() {
        let (pool, b) = pool_with(&[true, true, true]).await;

        assert_eq!(pool.select().unwrap().id(), b[0].id());
        assert_eq!(pool.select().unwrap().id(), b[1].id());
        // Cursor now on b[2]; removing b[0] must not skip it.
        pool.remove(&b[0]).await;
        assert_eq!(pool.select().unwrap().id(), b[2].id());
        assert_eq!(pool.select().unwrap().id(), b[1].id());
    }

    #[tokio::test]
    async fn slow_drain_does_not_block_other_operations() {
        let (pool, b) = pool_with(&[true, true]).await;
        let pool = Arc::new(pool);
        let guard = b[0].begin_forward().unwrap();

        let remover = {
            let pool = pool.clone();
            let id = b[0].id();
            tokio::spawn(async move { pool.remove_id(id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!remover.is_finished());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.select().unwrap().id(), b[1].id());
        pool.add(Arc::new(static_backend("http://127.0.0.1:9300", true))).await.unwrap();
        assert_eq!(pool.total_connections(), 0, "detached backends no longer count");

        drop(guard);
        let removed = tokio::time::timeout(Duration::from_secs(1), remover).await.unwrap().unwrap();
        assert_eq!(removed.map(|r| r.id()), Some(b[0].id()));
    }

    #[tokio::test]
    async fn total_connections_sums_live_forwards() {
        let (pool, b) = pool_with(&[true, true]).await;
        let _g1 = b[0].begin_forward().unwrap();
        let _g2 = b[1].begin_forward().unwrap();
        let g3 = b[1].begin_forward().unwrap();
        assert_eq!(pool.total_connections(), 3);
        drop(g3);
        assert_eq!(pool.total_connections(), 2);
    }

    #[tokio::test]
    async fn concurrent_selects_spread_evenly() {
        let (pool, b) = pool_with(&[true, true, true]).await;
        let pool = Arc::new(pool);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                (0..100).map(|_| pool.select().unwrap().id()).collect::<Vec<_>>()
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                *counts.entry(id).or_insert(0usize) += 1;
            }
        }
        for backend in &b {
            assert_eq!(counts[&backend.id()], 200);
        }
    }

    #[tokio::test]
    async fn selected_backend_refuses_forward_after_removal() {
        use crate::load_balancer::backend::build_client;
        use crate::load_balancer::ForwardError;
        use crate::mock::MockUpstream;
        use axum::body::Body;
        use axum::http::Request;

        let upstream = MockUpstream::start("removed").await.unwrap();
        let checker = Arc::new(StaticChecker::new(true));
        let backend = Arc::new(Backend::new(Url::parse(&upstream.url()).unwrap(), checker).unwrap());
        let pool = BackendPool::new();
        pool.add(backend.clone()).await.unwrap();

        let selected = pool.select().unwrap();
        assert!(pool.remove(&backend).await);
        assert_eq!(selected.status(), BackendStatus::Closed);

        let client = build_client(Duration::from_secs(1));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = selected.forward(&client, request, None).await.unwrap_err();

        assert!(matches!(err, ForwardError::BackendClosed(id) if id == backend.id()));
        assert_eq!(upstream.hits(), 0);
        assert_eq!(selected.in_flight(), 0);
        assert_eq!(selected.connections(), 0);
    }

    #[tokio::test]
    async fn close_waits_for_forward_that_beat_it() {
        let (pool, b) = pool_with(&[true]).await;
        let guard = b[0].begin_forward().unwrap();

        let remove = pool.remove(&b[0]);
        tokio::pin!(remove);
        assert!(tokio::time::timeout(Duration::from_millis(50), remove.as_mut()).await.is_err());
        assert!(matches!(b[0].begin_forward(), Err(crate::load_balancer::ForwardError::BackendClosed(_))));

        drop(guard);
        assert!(tokio::time::timeout(Duration::from_secs(1), remove).await.unwrap());
    }
}
