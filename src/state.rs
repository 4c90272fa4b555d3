//! Application state
//!
//! Holds all shared components and configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::call::CallCoordinator;
use crate::door::DoorActuator;
use crate::registry::DeviceRegistry;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory holding device definition files
    pub definitions_dir: PathBuf,
    /// Reconciliation pass interval
    pub reconcile_interval: Duration,
    /// How long a call waits for an answer
    pub call_timeout: Duration,
    /// Delay before an opened door re-closes
    pub auto_close_delay: Duration,
    /// Backoff before re-establishing the management subscription
    pub resubscribe_backoff: Duration,
    /// Liveness announce interval
    pub heartbeat_interval: Duration,
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            definitions_dir: std::env::var("DEFINITIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("doorphones")),
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SEC", 10),
            call_timeout: env_secs("CALL_TIMEOUT_SEC", 30),
            auto_close_delay: env_secs("AUTO_CLOSE_DELAY_SEC", 10),
            resubscribe_backoff: env_secs("RESUBSCRIBE_BACKOFF_SEC", 5),
            heartbeat_interval: env_secs("HEARTBEAT_INTERVAL_SEC", 10),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Device registry
    pub registry: Arc<DeviceRegistry>,
    /// Message bus
    pub bus: Arc<dyn MessageBus>,
    /// Call session coordinator
    pub coordinator: Arc<CallCoordinator>,
    /// Door actuator
    pub door: Arc<DoorActuator>,
}
