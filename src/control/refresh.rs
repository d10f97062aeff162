//! Hot configuration reload.
//!
//! Every component whose behaviour depends on the configuration registers a
//! [`ConfigListener`] with the [`ConfigRefresh`] coordinator. On each tick the
//! coordinator fetches the configuration, asks every listener whether the
//! change concerns it and hands the new value to those that say yes. The
//! active configuration is swapped only when every listener applied the
//! change; listeners that already applied it are handed the previous value
//! back otherwise.

use crate::control::ControlPlaneClient;
use crate::core::{Config, Result};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A component that reacts to configuration changes.
pub trait ConfigListener: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &'static str;

    /// Whether the difference between `current` and `latest` concerns this listener
    fn is_updated(&self, current: &Config, latest: &Config) -> bool;

    /// Apply `latest`. On error the listener must keep its previous state.
    fn on_update(&self, latest: &Config) -> Result<()>;
}

/// Outcome of one refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No listener was interested in the change
    Unchanged,
    /// Every interested listener applied the change and it was published
    Applied,
    /// At least one listener failed; the previous configuration stays active
    Rejected,
}

/// Routes configuration changes to the registered listeners
pub struct ConfigRefresh {
    current: Arc<ArcSwap<Config>>,
    listeners: Vec<Arc<dyn ConfigListener>>,
    client: Option<ControlPlaneClient>,
}

impl ConfigRefresh {
    /// Create a coordinator publishing into `current`
    pub fn new(current: Arc<ArcSwap<Config>>, client: Option<ControlPlaneClient>) -> Self {
        Self {
            current,
            listeners: Vec::new(),
            client,
        }
    }

    /// Register a listener; listeners are notified in registration order
    pub fn register(&mut self, listener: Arc<dyn ConfigListener>) {
        self.listeners.push(listener);
    }

    /// The active configuration
    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Notify listeners of `latest` and publish it if all of them succeed.
    pub fn apply(&self, latest: Config) -> Result<RefreshOutcome> {
        latest.validate()?;

        let current = self.current.load_full();
        let mut applied: Vec<&Arc<dyn ConfigListener>> = Vec::new();
        let mut first_error = None;

        for listener in &self.listeners {
            if !listener.is_updated(&current, &latest) {
                continue;
            }
            match listener.on_update(&latest) {
                Ok(()) => {
                    debug!("{} applied configuration change", listener.name());
                    applied.push(listener);
                },
                Err(e) => {
                    error!("{} rejected configuration change: {}", listener.name(), e);
                    first_error.get_or_insert(e);
                },
            }
        }

        if let Some(e) = first_error {
            for listener in applied {
                if let Err(restore) = listener.on_update(&current) {
                    error!("{} failed to restore previous configuration: {}", listener.name(), restore);
                }
            }
            warn!("Keeping previous configuration: {}", e);
            return Ok(RefreshOutcome::Rejected);
        }

        if applied.is_empty() && *current == latest {
            return Ok(RefreshOutcome::Unchanged);
        }

        self.current.store(Arc::new(latest));
        if applied.is_empty() {
            Ok(RefreshOutcome::Unchanged)
        } else {
            info!("Configuration updated ({} listeners)", applied.len());
            Ok(RefreshOutcome::Applied)
        }
    }

    /// Fetch the configuration once and apply it.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome> {
        let Some(client) = &self.client else {
            return Ok(RefreshOutcome::Unchanged);
        };
        let remote = client.fetch_config().await?;
        let latest = self.current.load().merge_remote(remote);
        self.apply(latest)
    }

    /// Refresh on every tick until the stop signal fires.
    pub async fn run(self: Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        // the first tick completes immediately; the startup config is already active
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_once().await {
                        Ok(outcome) => debug!("Config refresh finished: {:?}", outcome),
                        Err(e) => warn!("Config refresh failed ({}): {}", e.category(), e),
                    }
                }
                _ = stop.changed() => {
                    info!("Config refresh loop stopped");
                    break;
                }
            }
        }
    }
}
