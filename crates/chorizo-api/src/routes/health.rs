//! Health probes, mounted outside the auth layer.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(crate::metrics::render))
}

/// GET /health: liveness plus the registered entity types.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let types = state.engine.registry().schemas().names();
    Json(json!({
        "status": "ok",
        "types": types,
        "auth": state.auth.is_some(),
    }))
}
