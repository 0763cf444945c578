//! `/api/models` — catalog view, passed straight through from the
//! [`wingman_core::catalog::Catalog`] collaborator.

use super::ApiResult;
use crate::server::AppState;
use axum::extract::State;
use axum::response::Json;
use serde_json::Value;
use std::sync::Arc;

pub async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let body = state.catalog.fetch().await?;
    Ok(Json(body))
}
