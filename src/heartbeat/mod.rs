//! Liveness heartbeat
//!
//! Periodically announces every registered device as `online` on its
//! `intercom/{mac}/life` topic, independent of config or door-state
//! changes. The matching `deleted` announcement is published by the
//! reconciler when a definition disappears.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::events;
use crate::registry::DeviceRegistry;

/// Periodic online announcer
pub struct LifeAnnouncer {
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
    interval: Duration,
}

impl LifeAnnouncer {
    pub fn new(registry: Arc<DeviceRegistry>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            registry,
            bus,
            interval: Duration::from_secs(10),
        }
    }

    /// Override the announce interval (tests)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Announce loop; runs until the process exits
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Life announcer started");
        loop {
            self.announce_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One announce pass over all registered devices
    pub async fn announce_once(&self) {
        for record in self.registry.list().await {
            let mac = &record.config.mac;
            match self
                .bus
                .publish(&events::life_topic(mac), events::life("online"), false)
                .await
            {
                Ok(()) => tracing::debug!(device = %mac, "Liveness announced"),
                Err(e) => {
                    tracing::error!(device = %mac, error = %e, "Failed to publish liveness")
                }
            }
        }
    }
}
