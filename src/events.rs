//! Bus event payloads and topic layout
//!
//! Everything the gateway publishes goes through here so the wire shapes
//! stay in one place:
//!
//! - `intercom/{mac}/message` - door/call status notifications
//! - `intercom/{mac}/config`  - device add/remove/modify (retained)
//! - `intercom/{mac}/life`    - liveness heartbeat

use chrono::Utc;
use serde_json::{json, Value};

use crate::registry::{DeviceConfig, DoorStatus};

/// Status notification topic for a device
pub fn message_topic(mac: &str) -> String {
    format!("intercom/{mac}/message")
}

/// Config change topic for a device
pub fn config_topic(mac: &str) -> String {
    format!("intercom/{mac}/config")
}

/// Liveness topic for a device
pub fn life_topic(mac: &str) -> String {
    format!("intercom/{mac}/life")
}

/// Management command wildcard, subscribed by the inbound dispatcher
pub const MANAGEMENT_FILTER: &str = "intercom/+/management/#";

/// Event timestamp, wall clock
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Successful door open via access code
pub fn key_success(code: i64, door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "key",
        "key": code,
        "status": "success",
        "door_status": door_status,
    })
}

/// Rejected access code
pub fn key_fail(door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "key",
        "status": "fail",
        "reason": "incorrect key",
        "door_status": door_status,
    })
}

/// Door opened by a management command
pub fn management_open(label: &str, door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": label,
        "status": "success",
        "door_status": door_status,
    })
}

/// Door opened because a resident answered a call
pub fn call_response_open(door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "call-response",
        "status": "success",
        "door_status": door_status,
    })
}

/// Call accepted and ringing
pub fn call_start_success(apartment: &str, location: &str, door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "call-start",
        "apartment": apartment,
        "location": location,
        "status": "success",
        "door_status": door_status,
    })
}

/// Call rejected: apartment not served by this device
pub fn call_start_fail(apartment: &str, location: &str, door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "call-start",
        "apartment": apartment,
        "location": location,
        "status": "fail",
        "reason": "incorrect apartment",
        "door_status": door_status,
    })
}

/// Call resolved (opened / canceled / timeout)
pub fn call_end(result: &str, door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "call-end",
        "status": "success",
        "result": result,
        "door_status": door_status,
    })
}

/// Door re-closed by the auto-close timer
pub fn auto_close(door_status: DoorStatus) -> Value {
    json!({
        "time": timestamp(),
        "event": "auto-close",
        "status": "success",
        "door_status": door_status,
    })
}

/// Device definition appeared
pub fn config_added(new_config: &DeviceConfig) -> Value {
    json!({
        "time": timestamp(),
        "event": "added",
        "new_config": new_config,
    })
}

/// Device definition disappeared
pub fn config_removed(old_config: &DeviceConfig) -> Value {
    json!({
        "time": timestamp(),
        "event": "removed",
        "old_config": old_config,
    })
}

/// Device definition changed
pub fn config_modified(new_config: &DeviceConfig, old_config: &DeviceConfig) -> Value {
    json!({
        "time": timestamp(),
        "event": "modified",
        "new_config": new_config,
        "old_config": old_config,
    })
}

/// Liveness heartbeat payload
pub fn life(status: &str) -> Value {
    json!({
        "time": timestamp(),
        "status": status,
    })
}
