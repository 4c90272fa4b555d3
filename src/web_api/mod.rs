//! WebAPI - REST endpoints
//!
//! ## Responsibilities
//!
//! - HTTP routes for the front-end/API collaborator
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
