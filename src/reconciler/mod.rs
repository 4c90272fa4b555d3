//! Config Reconciler
//!
//! Keeps the registry in line with the on-disk device definitions and
//! announces every change on the bus. Runs as a fixed-interval loop; each
//! pass loads and validates all definition files, diffs them against the
//! previous snapshot, updates the registry, then publishes one retained
//! config event per affected device.
//!
//! The loop never dies: a broken definition file is skipped with a warning,
//! a failed publish is logged, and the next pass starts on schedule either
//! way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::events;
use crate::registry::{DeviceConfig, DeviceRegistry};

/// Periodic definition-to-registry reconciliation
pub struct ConfigReconciler {
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
    definitions_dir: PathBuf,
    interval: Duration,
    /// Snapshot of the previous pass, owned exclusively by this loop
    previous: HashMap<String, DeviceConfig>,
}

impl ConfigReconciler {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: Arc<dyn MessageBus>,
        definitions_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            bus,
            definitions_dir,
            interval: Duration::from_secs(10),
            previous: HashMap::new(),
        }
    }

    /// Override the pass interval (tests)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reconciliation loop; runs until the process exits
    pub async fn run(mut self) {
        tracing::info!(
            definitions_dir = %self.definitions_dir.display(),
            interval_secs = self.interval.as_secs(),
            "Config reconciler started"
        );

        loop {
            if let Err(e) = self.run_pass().await {
                tracing::error!(error = %e, "Reconciliation pass failed");
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One reconciliation pass
    pub async fn run_pass(&mut self) -> Result<()> {
        let configs = self.load_definitions()?;

        let mut new_configs: HashMap<String, DeviceConfig> = HashMap::new();
        for config in configs {
            // duplicate macs: last file in lexicographic order wins
            new_configs.insert(config.mac.clone(), config);
        }

        let mut added: Vec<&String> = new_configs
            .keys()
            .filter(|mac| !self.previous.contains_key(*mac))
            .collect();
        let mut deleted: Vec<&String> = self
            .previous
            .keys()
            .filter(|mac| !new_configs.contains_key(*mac))
            .collect();
        let mut modified: Vec<&String> = new_configs
            .iter()
            .filter(|(mac, config)| {
                self.previous
                    .get(*mac)
                    .map(|prev| prev != *config)
                    .unwrap_or(false)
            })
            .map(|(mac, _)| mac)
            .collect();

        // stable order within one pass
        added.sort();
        deleted.sort();
        modified.sort();

        if added.is_empty() && deleted.is_empty() && modified.is_empty() {
            tracing::debug!("Definitions unchanged");
            return Ok(());
        }

        // registry mutation happens-before any event publication
        let mut upsert: Vec<DeviceConfig> = new_configs.values().cloned().collect();
        upsert.sort_by(|a, b| a.mac.cmp(&b.mac));
        self.registry.upsert(&upsert).await;

        for mac in added {
            self.publish_config(mac, events::config_added(&new_configs[mac]))
                .await;
            tracing::info!(device = %mac, "Device added");
        }

        for mac in deleted {
            self.publish_config(mac, events::config_removed(&self.previous[mac]))
                .await;
            if let Err(e) = self
                .bus
                .publish(&events::life_topic(mac), events::life("deleted"), false)
                .await
            {
                tracing::error!(device = %mac, error = %e, "Failed to publish deletion liveness");
            }
            tracing::info!(device = %mac, "Device removed");
        }

        for mac in modified {
            self.publish_config(
                mac,
                events::config_modified(&new_configs[mac], &self.previous[mac]),
            )
            .await;
            tracing::info!(device = %mac, "Device modified");
        }

        self.previous = new_configs;
        tracing::info!(device_count = self.previous.len(), "Reconciliation pass complete");
        Ok(())
    }

    /// Load and validate all definition files
    ///
    /// Files are processed in lexicographic filename order so duplicate-mac
    /// resolution is reproducible. A file that fails to parse or validate is
    /// skipped with a warning; it never aborts the pass.
    fn load_definitions(&self) -> Result<Vec<DeviceConfig>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.definitions_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yml") | Some("yaml")
                )
            })
            .collect();
        paths.sort();

        let mut configs = Vec::new();
        for path in paths {
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable definition");
                    continue;
                }
            };
            match serde_yaml::from_str::<DeviceConfig>(&raw) {
                Ok(config) => configs.push(config),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping invalid definition");
                }
            }
        }

        Ok(configs)
    }

    /// Retained publish to the device's config topic; failures are logged
    /// and never block the rest of the pass
    async fn publish_config(&self, mac: &str, payload: serde_json::Value) {
        if let Err(e) = self
            .bus
            .publish(&events::config_topic(mac), payload, true)
            .await
        {
            tracing::error!(device = %mac, error = %e, "Failed to publish config event");
        }
    }
}
