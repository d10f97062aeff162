//! Latency thresholds per (service, request).
//!
//! Services are remembered the first time a threshold is asked for. A
//! background loop fetches the thresholds of every remembered service from
//! the control plane and swaps each service's map in one step, so lookups
//! never see a partially written map.

use crate::control::{ConfigListener, ControlPlaneClient};
use crate::core::{Config, EntityKey, Result, ThresholdEntry};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Key of the service-wide entry in a threshold map
pub const SERVICE_DEFAULT_REQUEST: &str = "";

type ThresholdMap = HashMap<String, ThresholdEntry>;

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    env: String,
    site: String,
    default_threshold_seconds: f64,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            env: config.asserts_env.clone(),
            site: config.asserts_site.clone(),
            default_threshold_seconds: config.sampling_latency_threshold_seconds,
        }
    }
}

/// Thread-safe threshold lookup backed by the control plane
pub struct ThresholdHelper {
    client: Option<ControlPlaneClient>,
    settings: RwLock<Settings>,
    entity_keys: DashMap<String, EntityKey>,
    thresholds: DashMap<String, Arc<ThresholdMap>>,
}

impl ThresholdHelper {
    /// Without a client only the default threshold is ever returned
    pub fn new(config: &Config, client: Option<ControlPlaneClient>) -> Self {
        Self {
            client,
            settings: RwLock::new(Settings::from_config(config)),
            entity_keys: DashMap::new(),
            thresholds: DashMap::new(),
        }
    }

    /// Latency above which a request of a service is slow, in seconds
    pub fn get_threshold(&self, namespace: &str, service: &str, request: &str) -> f64 {
        let settings = self.settings.read();
        let entity_key = EntityKey::service(&settings.env, &settings.site, namespace, service);
        let key = entity_key.as_string();

        if let Some(map) = self.thresholds.get(&key) {
            let entry = map
                .get(request)
                .or_else(|| map.get(SERVICE_DEFAULT_REQUEST));
            if let Some(entry) = entry {
                return entry.upper_bound_seconds;
            }
        } else if !self.entity_keys.contains_key(&key) {
            debug!("Tracking thresholds for {}", entity_key);
            self.entity_keys.entry(key).or_insert(entity_key);
        }

        settings.default_threshold_seconds
    }

    /// Default threshold in seconds
    pub fn default_threshold(&self) -> f64 {
        self.settings.read().default_threshold_seconds
    }

    /// Number of services being tracked
    pub fn entity_count(&self) -> usize {
        self.entity_keys.len()
    }

    /// Replace the thresholds of one service
    pub fn install(&self, entity_key: &EntityKey, entries: Vec<ThresholdEntry>) {
        let map: ThresholdMap = entries
            .into_iter()
            .filter(|entry| {
                let valid = entry.upper_bound_seconds.is_finite() && entry.upper_bound_seconds > 0.0;
                if !valid {
                    debug!(
                        "Ignoring threshold {} for {}#{}",
                        entry.upper_bound_seconds, entity_key, entry.request_context
                    );
                }
                valid
            })
            .map(|entry| (entry.request_context.clone(), entry))
            .collect();

        let key = entity_key.as_string();
        self.entity_keys.entry(key.clone()).or_insert_with(|| entity_key.clone());
        self.thresholds.insert(key, Arc::new(map));
    }

    /// Fetch the thresholds of every tracked service concurrently.
    /// Returns how many services were updated.
    pub async fn sync_once(&self) -> usize {
        let Some(client) = &self.client else {
            return 0;
        };

        let entities: Vec<EntityKey> = self.entity_keys.iter().map(|e| e.value().clone()).collect();
        let mut tasks = JoinSet::new();
        for entity_key in entities {
            let client = client.clone();
            tasks.spawn(async move {
                let result = client.fetch_thresholds(&entity_key).await;
                (entity_key, result)
            });
        }

        let mut updated = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((entity_key, Ok(entries))) => {
                    self.install(&entity_key, entries);
                    updated += 1;
                },
                Ok((entity_key, Err(e))) => {
                    warn!("Keeping previous thresholds for {}: {}", entity_key, e);
                },
                Err(e) => warn!("Threshold fetch task failed: {}", e),
            }
        }
        updated
    }

    /// Sync on every tick until the stop signal fires
    pub async fn run(self: Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let updated = self.sync_once().await;
                    debug!("Threshold sync updated {}/{} services", updated, self.entity_count());
                }
                _ = stop.changed() => {
                    info!("Threshold sync loop stopped");
                    break;
                }
            }
        }
    }
}

impl ConfigListener for ThresholdHelper {
    fn name(&self) -> &'static str {
        "threshold-helper"
    }

    fn is_updated(&self, current: &Config, latest: &Config) -> bool {
        Settings::from_config(current) != Settings::from_config(latest)
    }

    fn on_update(&self, latest: &Config) -> Result<()> {
        *self.settings.write() = Settings::from_config(latest);
        Ok(())
    }
}
