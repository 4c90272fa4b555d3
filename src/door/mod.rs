//! Door Actuator
//!
//! Opens a device's door for a stated reason and re-closes it after a fixed
//! delay. Shared by manual key entry, call confirmation, and bus-driven
//! management commands. Opening is idempotent: an already-open door stays
//! untouched and no duplicate event goes out.
//!
//! Auto-close is scheduled by the caller, not by the actuator, so each path
//! (key, management, call) owns its own timer. Several timers may be pending
//! for one device; each one checks the door is still open when it fires, so
//! a stale timer never overrides later state.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::error::Result;
use crate::events;
use crate::registry::{DeviceRegistry, DoorStatus};

/// Why the door was opened
#[derive(Debug, Clone)]
pub enum OpenReason {
    /// Manual entry with an access code
    Key(i64),
    /// Management command from the bus, labeled by its event
    Management(String),
    /// Resident answered a call
    CallResponse,
}

/// Door open/close controller
pub struct DoorActuator {
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
    auto_close_delay: Duration,
}

impl DoorActuator {
    pub fn new(registry: Arc<DeviceRegistry>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            registry,
            bus,
            auto_close_delay: Duration::from_secs(10),
        }
    }

    /// Override the auto-close delay (tests)
    pub fn with_auto_close_delay(mut self, delay: Duration) -> Self {
        self.auto_close_delay = delay;
        self
    }

    /// Open the door if it is closed
    ///
    /// Returns `true` when the state actually changed. An already-open door
    /// is a no-op and publishes nothing. Callers that get `true` are
    /// responsible for scheduling one auto-close via [`spawn_auto_close`].
    ///
    /// [`spawn_auto_close`]: DoorActuator::spawn_auto_close
    pub async fn open(&self, mac: &str, reason: &OpenReason) -> Result<bool> {
        // single-lock transition: of two racing opens only one changes state
        let changed = self
            .registry
            .transition_door_status(mac, DoorStatus::Closed, DoorStatus::Open)
            .await?;
        if !changed {
            return Ok(false);
        }

        let payload = match reason {
            OpenReason::Key(code) => events::key_success(*code, DoorStatus::Open),
            OpenReason::Management(label) => events::management_open(label, DoorStatus::Open),
            OpenReason::CallResponse => events::call_response_open(DoorStatus::Open),
        };
        self.publish_message(mac, payload).await;

        tracing::info!(device = %mac, reason = ?reason, "Door opened");
        Ok(true)
    }

    /// Announce a rejected access code
    ///
    /// The door stays as it is; only the failure event goes out.
    pub async fn reject_key(&self, mac: &str) -> Result<()> {
        let status = self.registry.door_status(mac).await?;
        self.publish_message(mac, events::key_fail(status)).await;
        tracing::info!(device = %mac, "Access code rejected");
        Ok(())
    }

    /// Close the door after the fixed delay if it is still open
    pub async fn auto_close(&self, mac: &str) {
        tokio::time::sleep(self.auto_close_delay).await;

        match self
            .registry
            .transition_door_status(mac, DoorStatus::Open, DoorStatus::Closed)
            .await
        {
            Ok(true) => {}
            // already closed by another path, or device was removed meanwhile
            Ok(false) | Err(_) => return,
        }

        self.publish_message(mac, events::auto_close(DoorStatus::Closed))
            .await;
        tracing::info!(device = %mac, "Door auto-closed");
    }

    /// Fire-and-forget auto-close timer
    pub fn spawn_auto_close(self: &Arc<Self>, mac: &str) {
        let actuator = Arc::clone(self);
        let mac = mac.to_string();
        tokio::spawn(async move {
            actuator.auto_close(&mac).await;
        });
    }

    /// Publish to the device's message topic; transport errors are logged,
    /// never propagated, so door state stays authoritative
    async fn publish_message(&self, mac: &str, payload: Value) {
        if let Err(e) = self
            .bus
            .publish(&events::message_topic(mac), payload, false)
            .await
        {
            tracing::error!(device = %mac, error = %e, "Failed to publish door event");
        }
    }
}
