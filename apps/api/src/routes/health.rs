use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// GET /health, GET /api/health
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "UP",
        "service": "docloader-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339()
    }))
}
