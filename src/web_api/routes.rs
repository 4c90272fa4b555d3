//! API Routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::door::OpenReason;
use crate::error::{Error, Result};
use crate::registry::DeviceRecord;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:mac", get(get_device))
        .route("/api/devices/:mac/status", get(door_status))
        .route("/api/devices/:mac/key", post(open_door_by_key))
        // Calls
        .route("/api/devices/:mac/call", post(start_call))
        .route("/api/devices/:mac/call/cancel", post(cancel_call))
        .route("/api/devices/:mac/call-status", get(call_status))
        .route("/api/devices/:mac/call-status-update", get(call_status_update))
        .with_state(state)
}

// ========================================
// Device Handlers
// ========================================

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceRecord>> {
    Json(state.registry.list().await)
}

async fn get_device(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<DeviceRecord>> {
    state
        .registry
        .get(&mac)
        .await
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Device {mac} not found")))
}

async fn door_status(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Result<Json<Value>> {
    let status = state.registry.door_status(&mac).await?;
    Ok(Json(json!({ "door_status": status })))
}

#[derive(Debug, Deserialize)]
struct KeyRequest {
    code: String,
}

/// Manual door open with an access code
async fn open_door_by_key(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(request): Json<KeyRequest>,
) -> Result<Json<Value>> {
    let record = state
        .registry
        .get(&mac)
        .await
        .ok_or_else(|| Error::NotFound(format!("Device {mac} not found")))?;

    let code = request.code.parse::<i64>().ok();
    let allowed = code
        .map(|c| record.config.allowed_keys.contains(&c))
        .unwrap_or(false);

    if !allowed {
        state.door.reject_key(&mac).await?;
        return Err(Error::Validation(format!("Incorrect key for {mac}")));
    }

    // allowed implies code parsed
    let code = code.unwrap_or_default();
    state.door.open(&mac, &OpenReason::Key(code)).await?;
    state.door.spawn_auto_close(&mac);

    let status = state.registry.door_status(&mac).await?;
    Ok(Json(json!({ "door_status": status })))
}

// ========================================
// Call Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct CallRequest {
    apartment: String,
}

async fn start_call(
    State(state): State<AppState>,
    Path(mac): Path<String>,
    Json(request): Json<CallRequest>,
) -> Result<Json<Value>> {
    state.coordinator.start_call(&mac, &request.apartment).await?;
    Ok(Json(json!({ "status": "calling" })))
}

async fn cancel_call(State(state): State<AppState>, Path(mac): Path<String>) -> Json<Value> {
    state.coordinator.cancel_call(&mac).await;
    Json(json!({ "status": "ok" }))
}

async fn call_status(State(state): State<AppState>, Path(mac): Path<String>) -> Json<Value> {
    let status = state.coordinator.status(&mac).await;
    Json(json!({ "status": status.as_str() }))
}

/// Status read that consumes a finished result
async fn call_status_update(
    State(state): State<AppState>,
    Path(mac): Path<String>,
) -> Json<Value> {
    let status = state.coordinator.consume_status(&mac).await;
    Json(json!({ "status": status.as_str() }))
}
