//! Device Registry
//!
//! In-memory map of device identity (hardware address) to device record.
//! Single owner of record lifetime and the only place `door_status` is
//! mutated; every other component goes through this API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Validated device definition
///
/// Loaded verbatim from a definition file; two configs are equal iff all
/// fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware address, unique and immutable
    pub mac: String,
    /// Human-readable location label
    pub location: String,
    /// Access codes accepted at the door
    pub allowed_keys: Vec<i64>,
    /// Apartment numbers this device can call
    pub apartments: Vec<i64>,
}

/// Door state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorStatus {
    Closed,
    Open,
}

/// One live device: its config plus current door state
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub config: DeviceConfig,
    pub door_status: DoorStatus,
}

/// Registry of known devices
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Bring the registry in line with `configs`
    ///
    /// - macs present in `configs` but not here get a fresh record (door
    ///   `Closed`)
    /// - macs present here but not in `configs` are removed
    /// - records whose config changed get the new config, keeping their
    ///   current `door_status`
    /// - unchanged records are left untouched
    pub async fn upsert(&self, configs: &[DeviceConfig]) {
        let mut devices = self.devices.write().await;

        for config in configs {
            match devices.get_mut(&config.mac) {
                Some(record) => {
                    if record.config != *config {
                        record.config = config.clone();
                    }
                }
                None => {
                    devices.insert(
                        config.mac.clone(),
                        DeviceRecord {
                            config: config.clone(),
                            door_status: DoorStatus::Closed,
                        },
                    );
                }
            }
        }

        let keep: std::collections::HashSet<&str> =
            configs.iter().map(|c| c.mac.as_str()).collect();
        devices.retain(|mac, _| keep.contains(mac.as_str()));
    }

    /// Look up one device
    pub async fn get(&self, mac: &str) -> Option<DeviceRecord> {
        let devices = self.devices.read().await;
        devices.get(mac).cloned()
    }

    /// Current door status for a device
    pub async fn door_status(&self, mac: &str) -> Result<DoorStatus> {
        let devices = self.devices.read().await;
        devices
            .get(mac)
            .map(|record| record.door_status)
            .ok_or_else(|| Error::NotFound(format!("Device {mac} not found")))
    }

    /// Mutate door status in place
    pub async fn set_door_status(&self, mac: &str, status: DoorStatus) -> Result<()> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(mac) {
            Some(record) => {
                record.door_status = status;
                tracing::info!(device = %mac, door_status = ?status, "Door status changed");
                Ok(())
            }
            None => Err(Error::NotFound(format!("Device {mac} not found"))),
        }
    }

    /// Switch door status only if it currently equals `from`
    ///
    /// Check and write happen under one write lock, so of two racing
    /// transitions exactly one observes `from` and wins; the other gets
    /// `false`.
    pub async fn transition_door_status(
        &self,
        mac: &str,
        from: DoorStatus,
        to: DoorStatus,
    ) -> Result<bool> {
        let mut devices = self.devices.write().await;
        let record = devices
            .get_mut(mac)
            .ok_or_else(|| Error::NotFound(format!("Device {mac} not found")))?;
        if record.door_status != from {
            return Ok(false);
        }
        record.door_status = to;
        tracing::info!(device = %mac, door_status = ?to, "Door status changed");
        Ok(true)
    }

    /// Snapshot of all records, sorted by mac for stable enumeration
    pub async fn list(&self) -> Vec<DeviceRecord> {
        let devices = self.devices.read().await;
        let mut records: Vec<DeviceRecord> = devices.values().cloned().collect();
        records.sort_by(|a, b| a.config.mac.cmp(&b.config.mac));
        records
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mac: &str, location: &str) -> DeviceConfig {
        DeviceConfig {
            mac: mac.to_string(),
            location: location.to_string(),
            allowed_keys: vec![111],
            apartments: vec![5],
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_closed_records() {
        let registry = DeviceRegistry::new();
        registry.upsert(&[config("aa", "front")]).await;

        let record = registry.get("aa").await.unwrap();
        assert_eq!(record.door_status, DoorStatus::Closed);
        assert_eq!(record.config.location, "front");
    }

    #[tokio::test]
    async fn test_upsert_removes_absent_devices() {
        let registry = DeviceRegistry::new();
        registry.upsert(&[config("aa", "front"), config("bb", "back")]).await;
        registry.upsert(&[config("aa", "front")]).await;

        assert!(registry.get("aa").await.is_some());
        assert!(registry.get("bb").await.is_none());
    }

    #[tokio::test]
    async fn test_upsert_preserves_door_status() {
        let registry = DeviceRegistry::new();
        registry.upsert(&[config("aa", "front")]).await;
        registry.set_door_status("aa", DoorStatus::Open).await.unwrap();

        // unchanged config
        registry.upsert(&[config("aa", "front")]).await;
        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);

        // modified config keeps door status too
        registry.upsert(&[config("aa", "side")]).await;
        let record = registry.get("aa").await.unwrap();
        assert_eq!(record.config.location, "side");
        assert_eq!(record.door_status, DoorStatus::Open);
    }

    #[tokio::test]
    async fn test_set_door_status_unknown_device() {
        let registry = DeviceRegistry::new();
        let err = registry.set_door_status("zz", DoorStatus::Open).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_door_status() {
        let registry = DeviceRegistry::new();
        registry.upsert(&[config("aa", "front")]).await;

        let changed = registry
            .transition_door_status("aa", DoorStatus::Closed, DoorStatus::Open)
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);

        // the state already moved; a second identical transition loses
        let changed = registry
            .transition_door_status("aa", DoorStatus::Closed, DoorStatus::Open)
            .await
            .unwrap();
        assert!(!changed);

        let err = registry
            .transition_door_status("zz", DoorStatus::Closed, DoorStatus::Open)
            .await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let registry = DeviceRegistry::new();
        registry.upsert(&[config("bb", "back"), config("aa", "front")]).await;

        let records = registry.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].config.mac, "aa");
        assert_eq!(records[1].config.mac, "bb");
    }
}
