//! `POST /api/utils/log` — append a structured log line submitted by a client.

use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use tracing::info;

pub async fn log(Json(body): Json<Value>) -> StatusCode {
    info!(target: "client", "{body}");
    StatusCode::OK
}
