//! `/api/inference*` — queue inspection, start/stop/reset with the
//! single-active-inference state machine ("start semantics").

use super::{ApiError, ApiResult};
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use wingman_core::config::{DefaultsConfig, TimeoutConfig};
use wingman_core::model::{DownloadItemStatus, WingmanItem, WingmanItemStatus};
use wingman_core::Error;

#[derive(Debug, Deserialize, Default)]
pub struct AliasQuery {
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub alias: String,
    #[serde(rename = "modelRepo")]
    pub model_repo: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(rename = "contextSize", default)]
    pub context_size: Option<u32>,
    #[serde(rename = "gpuLayers", default)]
    pub gpu_layers: Option<i32>,
}

pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<AliasQuery>) -> ApiResult<Json<Vec<WingmanItem>>> {
    if let Some(alias) = q.alias.filter(|a| !a.is_empty()) {
        let row = state.store.wingman_get(&alias)?;
        return Ok(Json(row.into_iter().collect()));
    }
    Ok(Json(state.store.wingman_get_all()?))
}

pub async fn start(State(state): State<Arc<AppState>>, Query(q): Query<StartQuery>) -> ApiResult<Response> {
    // Step 1: acquire the process-wide start mutex.
    let _guard = match state.start_mutex.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            return Err(ApiError(Error::Busy {
                message: "a start/switch is already in progress".to_string(),
            }))
        }
    };

    // Step 2: re-verify the single-active invariant.
    let active = state.store.wingman_get_all_active()?;
    if active.len() > 1 {
        return Err(ApiError(Error::IntegrityFailure {
            message: format!("{} active inference rows found, invariant broken", active.len()),
        }));
    }

    // Step 3: already active under this alias.
    if let Some(current) = active.first() {
        if current.alias == q.alias {
            return Ok((StatusCode::from_u16(208).unwrap(), Json(current.clone())).into_response());
        }

        // Step 4: a different row is active; drive it to stop first.
        drive_to_stop(&state, &current.alias).await?;
    }

    // Step 5: the backing download must exist and be complete.
    let download = state.store.download_get(&q.model_repo, &q.file_path)?;
    match download {
        Some(d) if d.status == DownloadItemStatus::Complete => {}
        _ => {
            return Err(ApiError(Error::NotFound {
                resource: format!("completed download for {}/{}", q.model_repo, q.file_path),
            }))
        }
    }

    // Step 6: queue the new row with resolved defaults.
    let item = WingmanItem::new_queued(
        q.alias,
        q.model_repo,
        q.file_path,
        q.address.unwrap_or_else(|| DefaultsConfig::ADDRESS.to_string()),
        q.port.unwrap_or(DefaultsConfig::INFERENCE_PORT),
        q.context_size.unwrap_or(DefaultsConfig::CONTEXT_SIZE),
        q.gpu_layers.unwrap_or(state.default_gpu_layers),
    );
    let saved = state.store.wingman_set(&item)?;
    Ok((StatusCode::ACCEPTED, Json(saved)).into_response())
}

pub async fn stop(State(state): State<Arc<AppState>>, Query(q): Query<AliasQuery>) -> ApiResult<Json<WingmanItem>> {
    let alias = q.alias.filter(|a| !a.is_empty()).ok_or_else(|| {
        ApiError(Error::InvalidArgument {
            message: "alias is required".to_string(),
        })
    })?;
    let row = drive_to_stop(&state, &alias).await?;
    Ok(Json(row))
}

pub async fn reset(State(state): State<Arc<AppState>>, Query(q): Query<AliasQuery>) -> ApiResult<Json<WingmanItem>> {
    let alias = q.alias.filter(|a| !a.is_empty()).ok_or_else(|| {
        ApiError(Error::InvalidArgument {
            message: "alias is required".to_string(),
        })
    })?;
    let row = drive_to_stop(&state, &alias).await?;
    state.store.wingman_remove(&alias)?;
    Ok(Json(row))
}

/// Write `cancelling` for `alias` and wait (bounded) for the supervisor to
/// finalize it to `complete`. Used by `/api/inference/stop` directly and by
/// `/api/inference/start`'s step 4 when switching the active alias.
async fn drive_to_stop(state: &AppState, alias: &str) -> ApiResult<WingmanItem> {
    let mut row = state.store.wingman_get(alias)?.ok_or_else(|| {
        ApiError(Error::NotFound {
            resource: alias.to_string(),
        })
    })?;

    if row.status.is_active() {
        row.status = WingmanItemStatus::Cancelling;
        state.store.wingman_set(&row)?;
    }

    let deadline = tokio::time::Instant::now() + TimeoutConfig::INFERENCE_SWITCH_WAIT;
    loop {
        let current = state.store.wingman_get(alias)?;
        match current {
            Some(item) if item.status.is_completed() => return Ok(item),
            None => {
                return Err(ApiError(Error::NotFound {
                    resource: alias.to_string(),
                }))
            }
            _ if tokio::time::Instant::now() >= deadline => {
                return Err(ApiError(Error::Other(format!(
                    "timed out waiting for {alias} to stop"
                ))))
            }
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}
