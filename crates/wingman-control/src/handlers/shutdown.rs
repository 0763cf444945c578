//! `/api/shutdown` — acknowledge immediately, then flip `requestedShutdown`
//! for the telemetry bus's shutdown watch to observe.

use super::ApiResult;
use crate::server::AppState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn shutdown(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.store.app_set("requestedShutdown", "true")?;
    Ok(Json(json!({ "status": "shutting down" })))
}
