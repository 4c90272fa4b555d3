//! Inbound Dispatcher
//!
//! Subscribes to the management wildcard topic and routes each inbound
//! command: a `call-response` event pokes the matching call session's
//! response signal, and every management command opens the door (with the
//! event name as the reason) and schedules its own auto-close.
//!
//! Connectivity failures never kill the loop; it resubscribes after a fixed
//! backoff, forever.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::{BusMessage, MessageBus};
use crate::call::CallCoordinator;
use crate::door::{DoorActuator, OpenReason};
use crate::events;

const MANAGEMENT_SENDER: &str = "management-service";

/// Bus-to-core command router
pub struct InboundDispatcher {
    bus: Arc<dyn MessageBus>,
    coordinator: Arc<CallCoordinator>,
    door: Arc<DoorActuator>,
    resubscribe_backoff: Duration,
}

impl InboundDispatcher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        coordinator: Arc<CallCoordinator>,
        door: Arc<DoorActuator>,
    ) -> Self {
        Self {
            bus,
            coordinator,
            door,
            resubscribe_backoff: Duration::from_secs(5),
        }
    }

    /// Override the resubscribe backoff (tests)
    pub fn with_resubscribe_backoff(mut self, backoff: Duration) -> Self {
        self.resubscribe_backoff = backoff;
        self
    }

    /// Dispatch loop; runs until the process exits
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.bus.subscribe(events::MANAGEMENT_FILTER).await {
                Ok(mut subscription) => {
                    tracing::info!(filter = events::MANAGEMENT_FILTER, "Management subscription established");
                    while let Some(message) = subscription.recv().await {
                        self.handle_message(message).await;
                    }
                    tracing::warn!("Management subscription ended");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to subscribe to management topic");
                }
            }

            tokio::time::sleep(self.resubscribe_backoff).await;
            tracing::info!("Retrying management subscription");
        }
    }

    /// Route one inbound management message
    ///
    /// Malformed messages are logged and dropped; they never affect the
    /// loop.
    pub async fn handle_message(&self, message: BusMessage) {
        let Some(mac) = message.topic.split('/').nth(1).map(str::to_string) else {
            tracing::warn!(topic = %message.topic, "Management topic without device segment");
            return;
        };

        let Some(event) = message.payload.get("event").and_then(|v| v.as_str()) else {
            tracing::warn!(
                topic = %message.topic,
                payload = %message.payload,
                "Management message without event field"
            );
            return;
        };

        tracing::info!(device = %mac, event = %event, "Management message received");

        if event == "call-response" {
            self.coordinator.notify_response(&mac).await;
        }

        let reason = OpenReason::Management(format!("{event} - {MANAGEMENT_SENDER}"));
        match self.door.open(&mac, &reason).await {
            Ok(_) => self.door.spawn_auto_close(&mac),
            Err(e) => {
                tracing::warn!(device = %mac, error = %e, "Management open failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::registry::{DeviceConfig, DeviceRegistry, DoorStatus};
    use serde_json::json;

    async fn setup() -> (
        Arc<DeviceRegistry>,
        Arc<InProcessBus>,
        Arc<CallCoordinator>,
        Arc<InboundDispatcher>,
    ) {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .upsert(&[DeviceConfig {
                mac: "aa".to_string(),
                location: "front".to_string(),
                allowed_keys: vec![111],
                apartments: vec![5],
            }])
            .await;
        let bus = Arc::new(InProcessBus::new());
        let coordinator = Arc::new(CallCoordinator::new(registry.clone(), bus.clone()));
        let door = Arc::new(DoorActuator::new(registry.clone(), bus.clone()));
        let dispatcher = Arc::new(InboundDispatcher::new(
            bus.clone(),
            coordinator.clone(),
            door,
        ));
        (registry, bus, coordinator, dispatcher)
    }

    fn management_message(mac: &str, payload: serde_json::Value) -> BusMessage {
        BusMessage {
            topic: format!("intercom/{mac}/management/door"),
            payload,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_management_command_opens_door() {
        let (registry, _bus, _coordinator, dispatcher) = setup().await;

        dispatcher
            .handle_message(management_message("aa", json!({"event": "unlock"})))
            .await;

        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_event_is_labeled_with_sender() {
        let (_registry, bus, _coordinator, dispatcher) = setup().await;
        let mut sub = bus.subscribe("intercom/aa/message").await.unwrap();

        dispatcher
            .handle_message(management_message("aa", json!({"event": "unlock"})))
            .await;

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload["event"], "unlock - management-service");
        assert_eq!(msg.payload["door_status"], "open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_response_resolves_session() {
        let (_registry, _bus, coordinator, dispatcher) = setup().await;
        coordinator.start_call("aa", "5").await.unwrap();

        dispatcher
            .handle_message(management_message("aa", json!({"event": "call-response"})))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            coordinator.status("aa").await.as_str(),
            "opened"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_call_response_still_opens_door() {
        let (registry, _bus, coordinator, dispatcher) = setup().await;

        // no live session; the confirmation is ignored but the door opens
        dispatcher
            .handle_message(management_message("aa", json!({"event": "call-response"})))
            .await;

        assert_eq!(coordinator.status("aa").await.as_str(), "waiting");
        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_is_skipped() {
        let (_registry, _bus, _coordinator, dispatcher) = setup().await;
        // must not panic or publish
        dispatcher
            .handle_message(management_message("zz", json!({"event": "unlock"})))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_without_event_is_dropped() {
        let (registry, _bus, _coordinator, dispatcher) = setup().await;

        dispatcher
            .handle_message(management_message("aa", json!({"other": 1})))
            .await;

        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_close_after_management_open() {
        let (registry, _bus, _coordinator, dispatcher) = setup().await;

        dispatcher
            .handle_message(management_message("aa", json!({"event": "unlock"})))
            .await;
        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_after_subscribe_failure() {
        let registry = Arc::new(DeviceRegistry::new());
        let bus = Arc::new(crate::bus::testing::FailingBus::new());
        let coordinator = Arc::new(CallCoordinator::new(registry.clone(), bus.clone()));
        let door = Arc::new(DoorActuator::new(registry, bus.clone()));
        let dispatcher = Arc::new(
            InboundDispatcher::new(bus.clone(), coordinator, door)
                .with_resubscribe_backoff(Duration::from_secs(1)),
        );
        tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(bus.subscribe_attempts() >= 1);

        // the loop keeps retrying on the backoff, it never gives up
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(bus.subscribe_attempts() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_consumes_bus_messages() {
        let (registry, bus, _coordinator, dispatcher) = setup().await;
        tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.publish(
            "intercom/aa/management/door",
            json!({"event": "unlock"}),
            false,
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.door_status("aa").await.unwrap(), DoorStatus::Open);
    }
}
