//! Route handlers: one module per Control API endpoint group.

pub mod downloads;
pub mod health;
pub mod inference;
pub mod models;
pub mod shutdown;
pub mod utils_log;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use wingman_core::Error;

/// Wraps a `wingman_core::Error` so it can implement `IntoResponse` (the
/// orphan rule blocks implementing a foreign trait for a foreign type
/// directly). Maps via `Error::status_code()`.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
