//! Doorlink - intercom fleet gateway
//!
//! Bridges a fleet of door-intercom devices to a pub/sub message bus,
//! tracks each device's live door state, and mediates call-then-open
//! sessions.
//!
//! ## Components
//!
//! 1. DeviceRegistry - in-memory device records, sole owner of door state
//! 2. ConfigReconciler - definition files -> registry diff -> change events
//! 3. CallCoordinator - call session state machine (answer/cancel/timeout race)
//! 4. DoorActuator - door open with reason tagging and auto re-close
//! 5. InboundDispatcher - management commands from the bus into the core
//! 6. LifeAnnouncer - periodic liveness heartbeat
//! 7. WebAPI - REST endpoints for the front-end collaborator

pub mod bus;
pub mod call;
pub mod dispatcher;
pub mod door;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
