//! Configuration file watcher for hot reload.
//!
//! Backend membership and balancer settings (including the sticky sweep
//! interval) follow the file; listener and observability settings only apply
//! at startup. Startup overrides are re-applied to every revision.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::resolve_config;
use crate::config::overrides::ConfigOverrides;
use crate::config::schema::ProxyConfig;

/// Watches one configuration file and forwards every valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    overrides: ConfigOverrides,
    updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for reloaded configs.
    pub fn new(path: &Path, overrides: ConfigOverrides) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            overrides,
            updates,
        };
        (watcher, rx)
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            overrides,
            updates,
        } = self;
        let reload_path = path.clone();

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) if is_content_change(&event.kind) => reload(&reload_path, &overrides, &updates),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Config watch error"),
        };

        let mut watcher = RecommendedWatcher::new(
            handler,
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

fn reload(path: &Path, overrides: &ConfigOverrides, updates: &mpsc::UnboundedSender<ProxyConfig>) {
    match resolve_config(Some(path), overrides) {
        Ok(config) => {
            tracing::info!(path = %path.display(), backends = config.backends.len(), "Config reloaded");
            if updates.send(config).is_err() {
                tracing::debug!("Config receiver dropped, reload discarded");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
        }
    }
}
