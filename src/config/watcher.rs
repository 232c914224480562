//! Backend list watcher.
//!
//! Turns edits of the config file into reconcile requests for the pool.
//! Only the `[[backends]]` list matters at runtime: an edit that leaves it
//! unchanged produces no update, and an invalid file leaves the pool alone.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{BackendConfig, ProxyConfig};

/// Editors often truncate then write; let the write land before reading.
const SETTLE: Duration = Duration::from_millis(100);

pub struct ConfigWatcher {
    path: PathBuf,
    /// Backend list the pool was last reconciled against.
    applied: Vec<BackendConfig>,
    updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration the pool was bootstrapped from.
    pub fn new(path: &Path, current: &ProxyConfig) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            applied: current.backends.clone(),
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. The returned handle must be kept alive for as long
    /// as updates are wanted.
    ///
    /// The parent directory is watched rather than the file, so saves that
    /// replace the file by rename are seen too.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut applied,
            updates,
        } = self;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());
        let config_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Config watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                    return;
                }

                std::thread::sleep(SETTLE);
                let next = match load_config(&config_path) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::warn!(path = ?config_path, error = %e, "Ignoring invalid config, pool unchanged");
                        return;
                    }
                };

                if next.backends == applied {
                    tracing::debug!(path = ?config_path, backends = applied.len(), "Config saved, backend list unchanged");
                    return;
                }

                tracing::info!(
                    path = ?config_path,
                    previous = applied.len(),
                    backends = next.backends.len(),
                    "Backend list changed, reconciling"
                );
                applied = next.backends.clone();
                let _ = updates.send(next);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Watching backend list");
        Ok(watcher)
    }
}
