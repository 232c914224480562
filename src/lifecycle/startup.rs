//! Startup orchestration.
//!
//! # Responsibilities
//! - Register configured backends (each probed once, heartbeat started)
//! - Reconcile the pool against a reloaded configuration
//!
//! # Design Decisions
//! - Initial probes run concurrently so one slow target does not delay the rest
//! - Reload only adds and removes; backends that stay keep their identity,
//!   counters and health settings
//! - Reload only removes backends registered from the config file; runtime
//!   registrations through the admin API survive it

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use url::Url;

use crate::config::ProxyConfig;
use crate::load_balancer::{backend::parse_target, Backend, BackendOrigin, BackendPool};

/// Outcome of a reconcile pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
}

/// Register every backend listed in `config`. Returns how many were added.
pub async fn register_backends(pool: &BackendPool, config: &ProxyConfig) -> usize {
    let targets: Vec<Url> = config
        .backends
        .iter()
        .filter_map(|b| match parse_target(&b.url) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(url = %b.url, error = %e, "Skipping invalid backend");
                None
            }
        })
        .collect();

    add_targets(pool, config, targets).await
}

/// Bring the pool in line with `config`: drain config-sourced backends whose
/// target is no longer listed, register targets that are new. A target
/// already served by any backend, including a runtime one, is not added
/// again.
pub async fn reconcile(pool: &BackendPool, config: &ProxyConfig) -> ReconcileSummary {
    let wanted: HashSet<Url> = config
        .backends
        .iter()
        .filter_map(|b| parse_target(&b.url).ok())
        .collect();

    let current = pool.backends();
    let present: HashSet<Url> = current.iter().map(|b| b.target().clone()).collect();

    let stale: Vec<_> = current
        .iter()
        .filter(|b| b.origin() == BackendOrigin::Config && !wanted.contains(b.target()))
        .map(|b| pool.remove_id(b.id()))
        .collect();
    let removed = join_all(stale).await.into_iter().flatten().count();

    let fresh: Vec<Url> = config
        .backends
        .iter()
        .filter_map(|b| parse_target(&b.url).ok())
        .filter(|url| !present.contains(url))
        .collect();
    let added = add_targets(pool, config, fresh).await;

    let summary = ReconcileSummary { added, removed };
    tracing::info!(added = summary.added, removed = summary.removed, total = pool.len(), "Backends reconciled");
    summary
}

async fn add_targets(pool: &BackendPool, config: &ProxyConfig, targets: Vec<Url>) -> usize {
    let registrations = targets.into_iter().map(|target| async move {
        let backend = match Backend::from_url(target.as_str(), &config.health_check) {
            Ok(backend) => Arc::new(backend.with_origin(BackendOrigin::Config)),
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Failed to create backend");
                return false;
            }
        };
        match pool.add(backend).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Failed to register backend");
                false
            }
        }
    });

    join_all(registrations).await.into_iter().filter(|added| *added).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::health::BackendStatus;
    use crate::mock::MockUpstream;

    fn config_for(urls: &[String]) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends = urls.iter().map(|u| BackendConfig::new(u.clone())).collect();
        config
    }

    #[tokio::test]
    async fn registers_and_probes_configured_backends() {
        let up = MockUpstream::start("up").await.unwrap();
        let down = MockUpstream::start("down").await.unwrap();
        down.set_health_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);

        let pool = BackendPool::new();
        let config = config_for(&[up.url(), down.url(), "ftp://nope".to_string()]);
        assert_eq!(register_backends(&pool, &config).await, 2);

        let statuses: Vec<_> = pool.backends().iter().map(|b| b.status()).collect();
        assert!(statuses.contains(&BackendStatus::Healthy));
        assert!(statuses.contains(&BackendStatus::Unhealthy));
        assert_eq!(pool.healthy_count(), 1);
    }

    #[tokio::test]
    async fn reconcile_adds_new_and_drains_dropped_targets() {
        let a = MockUpstream::start("a").await.unwrap();
        let b = MockUpstream::start("b").await.unwrap();
        let c = MockUpstream::start("c").await.unwrap();

        let pool = BackendPool::new();
        register_backends(&pool, &config_for(&[a.url(), b.url()])).await;
        let kept = pool
            .backends()
            .into_iter()
            .find(|backend| backend.target().as_str().starts_with(&b.url()))
            .unwrap();
        let dropped = pool
            .backends()
            .into_iter()
            .find(|backend| backend.target().as_str().starts_with(&a.url()))
            .unwrap();

        let summary = reconcile(&pool, &config_for(&[b.url(), c.url()])).await;
        assert_eq!(summary, ReconcileSummary { added: 1, removed: 1 });
        assert_eq!(pool.len(), 2);
        assert!(pool.get(kept.id()).is_some(), "unchanged targets keep their identity");
        assert!(pool.get(dropped.id()).is_none());
        assert_eq!(dropped.status(), BackendStatus::Closed);

        assert_eq!(reconcile(&pool, &config_for(&[b.url(), c.url()])).await, ReconcileSummary::default());
    }

    #[tokio::test]
    async fn reconcile_keeps_runtime_backends() {
        let configured = MockUpstream::start("configured").await.unwrap();
        let runtime = MockUpstream::start("runtime").await.unwrap();

        let pool = BackendPool::new();
        register_backends(&pool, &config_for(&[configured.url()])).await;
        let added = Arc::new(Backend::from_url(&runtime.url(), &Default::default()).unwrap());
        pool.add(added.clone()).await.unwrap();
        assert_eq!(added.origin(), BackendOrigin::Runtime);

        let summary = reconcile(&pool, &config_for(&[])).await;
        assert_eq!(summary, ReconcileSummary { added: 0, removed: 1 });
        assert_eq!(pool.len(), 1);
        assert!(pool.get(added.id()).is_some());
        assert_eq!(added.status(), BackendStatus::Healthy);
    }
}
