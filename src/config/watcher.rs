//! Quota tier hot reload.
//!
//! Only the `[quota]` tiers apply without a restart, so the watcher turns a
//! config file change into a [`TierPolicy`] and sends it only when the tiers
//! actually changed. A file that fails to load leaves the running policy in
//! place.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::quota::TierPolicy;

/// Load `path` and derive the tier policy it configures.
pub fn reload_policy(path: &Path) -> Result<TierPolicy, ConfigError> {
    let config = load_config(path)?;
    Ok(TierPolicy::from(&config.quota))
}

/// Remembers the last policy sent so repeated write events stay quiet.
struct PolicyReloader {
    path: PathBuf,
    current: TierPolicy,
    policy_tx: mpsc::UnboundedSender<TierPolicy>,
}

impl PolicyReloader {
    /// Returns true when a new policy was sent.
    fn on_change(&mut self) -> bool {
        match reload_policy(&self.path) {
            Ok(policy) if policy == self.current => {
                tracing::debug!(path = ?self.path, "Config changed, quota tiers unchanged");
                false
            }
            Ok(policy) => {
                tracing::info!(
                    path = ?self.path,
                    public = policy.public.max,
                    authenticated = policy.authenticated.max,
                    seller = policy.seller.max,
                    endpoints = policy.endpoints.len(),
                    "Reloaded quota tiers"
                );
                self.current = policy.clone();
                self.policy_tx.send(policy).is_ok()
            }
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Config reload failed, keeping current quota tiers");
                false
            }
        }
    }
}

/// Watches the config file and emits tier policies on change.
pub struct ConfigWatcher {
    reloader: PolicyReloader,
}

impl ConfigWatcher {
    /// `current` is the policy the server starts with.
    pub fn new(path: &Path, current: TierPolicy) -> (Self, mpsc::UnboundedReceiver<TierPolicy>) {
        let (policy_tx, policy_rx) = mpsc::unbounded_channel();
        let reloader = PolicyReloader {
            path: path.to_path_buf(),
            current,
            policy_tx,
        };
        (Self { reloader }, policy_rx)
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched rather than the file, since editors
    /// often save by renaming a new file over the old one.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let mut reloader = self.reloader;
        let path = reloader.path.clone();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(OsString::from);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, file_name.as_deref()) => {
                    reloader.on_change();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Watching config for quota tier changes");
        Ok(watcher)
    }
}

fn touches(event: &Event, file_name: Option<&OsStr>) -> bool {
    let Some(name) = file_name else {
        return false;
    };
    (event.kind.is_modify() || event.kind.is_create())
        && event.paths.iter().any(|p| p.file_name() == Some(name))
}
