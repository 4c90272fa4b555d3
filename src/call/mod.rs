//! Call Session Coordinator
//!
//! Owns the per-device call state machine: `Idle -> Calling -> Idle`.
//! Starting a call races a resident's confirmation, an explicit stop
//! request, and a fixed timeout against each other; whichever fires first
//! decides the result, the losers are abandoned, and exactly one `call-end`
//! event goes out.
//!
//! Sessions never leave this module. The dispatcher and the web layer only
//! poke signals or read status through the coordinator's API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::MessageBus;
use crate::error::{Error, Result};
use crate::events;
use crate::registry::{DeviceRegistry, DoorStatus};

/// How a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    /// Resident answered and the door was opened
    Opened,
    /// Caller stopped the call
    Canceled,
    /// Nobody answered within the window
    TimedOut,
}

impl CallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallResult::Opened => "opened",
            CallResult::Canceled => "canceled",
            CallResult::TimedOut => "timeout",
        }
    }
}

/// Externally visible call status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// No call, no unconsumed result
    Waiting,
    /// A call is ringing right now
    Calling,
    /// A call ended; result not consumed yet
    Done(CallResult),
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Waiting => "waiting",
            CallStatus::Calling => "calling",
            CallStatus::Done(result) => result.as_str(),
        }
    }
}

/// Signals for one live call
///
/// Tokens are set-once and tolerate late or repeated sets, which is exactly
/// the semantics a losing race branch needs.
struct CallSession {
    response: CancellationToken,
    cancel: CancellationToken,
}

/// Per-device call state, kept in the coordinator's single owning map
enum CallState {
    Calling(CallSession),
    Done(CallResult),
}

/// Coordinates call sessions across all devices
pub struct CallCoordinator {
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
    /// Single owning map for all per-device call state; the resolution
    /// tasks share it
    calls: Arc<RwLock<HashMap<String, CallState>>>,
    call_timeout: Duration,
}

impl CallCoordinator {
    pub fn new(registry: Arc<DeviceRegistry>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            registry,
            bus,
            calls: Arc::new(RwLock::new(HashMap::new())),
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Override the answer window (tests)
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Start a call to `apartment` on device `mac`
    ///
    /// Publishes the `call-start` event and spawns the resolution task; the
    /// call itself resolves in the background, the caller returns
    /// immediately.
    pub async fn start_call(&self, mac: &str, apartment: &str) -> Result<()> {
        let record = self
            .registry
            .get(mac)
            .await
            .ok_or_else(|| Error::NotFound(format!("Device {mac} not found")))?;

        {
            let calls = self.calls.read().await;
            if matches!(calls.get(mac), Some(CallState::Calling(_))) {
                return Err(Error::Conflict(format!(
                    "Call already in progress for {mac}"
                )));
            }
        }

        let valid = apartment
            .parse::<i64>()
            .map(|n| record.config.apartments.contains(&n))
            .unwrap_or(false);

        if !valid {
            self.publish_message(
                mac,
                events::call_start_fail(apartment, &record.config.location, record.door_status),
            )
            .await;
            tracing::info!(device = %mac, apartment = %apartment, "Call rejected: incorrect apartment");
            return Err(Error::Validation(format!(
                "Apartment {apartment} not served by {mac}"
            )));
        }

        let response = CancellationToken::new();
        let cancel = CancellationToken::new();

        {
            let mut calls = self.calls.write().await;
            // re-check under the write lock so two racing starts cannot both
            // create a session
            if matches!(calls.get(mac), Some(CallState::Calling(_))) {
                return Err(Error::Conflict(format!(
                    "Call already in progress for {mac}"
                )));
            }
            calls.insert(
                mac.to_string(),
                CallState::Calling(CallSession {
                    response: response.clone(),
                    cancel: cancel.clone(),
                }),
            );
        }

        self.publish_message(
            mac,
            events::call_start_success(apartment, &record.config.location, record.door_status),
        )
        .await;
        tracing::info!(device = %mac, apartment = %apartment, "Call started");

        tokio::spawn(resolve(
            mac.to_string(),
            response,
            cancel,
            self.call_timeout,
            Arc::clone(&self.calls),
            Arc::clone(&self.registry),
            Arc::clone(&self.bus),
        ));

        Ok(())
    }

    /// Signal that the resident answered
    ///
    /// Stray confirmations for a device with no live call are ignored.
    pub async fn notify_response(&self, mac: &str) {
        let calls = self.calls.read().await;
        if let Some(CallState::Calling(session)) = calls.get(mac) {
            session.response.cancel();
            tracing::info!(device = %mac, "Call answered");
        }
    }

    /// Stop a ringing call; a no-op when nothing is ringing
    pub async fn cancel_call(&self, mac: &str) {
        let calls = self.calls.read().await;
        if let Some(CallState::Calling(session)) = calls.get(mac) {
            session.cancel.cancel();
            tracing::info!(device = %mac, "Call cancel requested");
        }
    }

    /// Current status without touching stored results
    pub async fn status(&self, mac: &str) -> CallStatus {
        let calls = self.calls.read().await;
        match calls.get(mac) {
            None => CallStatus::Waiting,
            Some(CallState::Calling(_)) => CallStatus::Calling,
            Some(CallState::Done(result)) => CallStatus::Done(*result),
        }
    }

    /// Status read that consumes a finished result
    pub async fn consume_status(&self, mac: &str) -> CallStatus {
        let mut calls = self.calls.write().await;
        let status = match calls.get(mac) {
            None => CallStatus::Waiting,
            Some(CallState::Calling(_)) => CallStatus::Calling,
            Some(CallState::Done(result)) => CallStatus::Done(*result),
        };
        if matches!(status, CallStatus::Done(_)) {
            calls.remove(mac);
        }
        status
    }

    async fn publish_message(&self, mac: &str, payload: serde_json::Value) {
        if let Err(e) = self
            .bus
            .publish(&events::message_topic(mac), payload, false)
            .await
        {
            tracing::error!(device = %mac, error = %e, "Failed to publish call event");
        }
    }
}

/// Background resolution: race timeout vs response vs cancel, then publish
/// the single result. Losing branches are dropped by the select, so they
/// can never fire a late side effect.
async fn resolve(
    mac: String,
    response: CancellationToken,
    cancel: CancellationToken,
    timeout: Duration,
    calls: Arc<RwLock<HashMap<String, CallState>>>,
    registry: Arc<DeviceRegistry>,
    bus: Arc<dyn MessageBus>,
) {
    tracing::info!(device = %mac, "Waiting for call resolution");

    let result = tokio::select! {
        _ = tokio::time::sleep(timeout) => CallResult::TimedOut,
        _ = response.cancelled() => CallResult::Opened,
        _ = cancel.cancelled() => CallResult::Canceled,
    };

    // replacing the entry drops the session; its tokens become inert
    {
        let mut calls = calls.write().await;
        calls.insert(mac.clone(), CallState::Done(result));
    }

    tracing::info!(device = %mac, result = result.as_str(), "Call resolved");

    let door_status = registry
        .door_status(&mac)
        .await
        .unwrap_or(DoorStatus::Closed);
    if let Err(e) = bus
        .publish(
            &events::message_topic(&mac),
            events::call_end(result.as_str(), door_status),
            false,
        )
        .await
    {
        tracing::error!(device = %mac, error = %e, "Failed to publish call-end event");
    }
}
