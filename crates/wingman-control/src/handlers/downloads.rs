//! `/api/downloads*` — queue inspection, enqueue, cancel, reset.

use super::{ApiError, ApiResult};
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::sync::Arc;
use wingman_core::model::{DownloadItem, DownloadItemStatus};
use wingman_core::Error;

#[derive(Debug, Deserialize, Default)]
pub struct RepoFileQuery {
    #[serde(rename = "modelRepo")]
    pub model_repo: Option<String>,
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
}

fn require_repo_file(q: &RepoFileQuery) -> Result<(&str, &str), ApiError> {
    match (q.model_repo.as_deref(), q.file_path.as_deref()) {
        (Some(repo), Some(path)) if !repo.is_empty() && !path.is_empty() => Ok((repo, path)),
        _ => Err(ApiError(Error::InvalidArgument {
            message: "modelRepo and filePath are required".to_string(),
        })),
    }
}

pub async fn list(State(state): State<Arc<AppState>>, Query(q): Query<RepoFileQuery>) -> ApiResult<Json<Vec<DownloadItem>>> {
    if let (Some(repo), Some(path)) = (q.model_repo.as_deref(), q.file_path.as_deref()) {
        let row = state.store.download_get(repo, path)?;
        return Ok(Json(row.into_iter().collect()));
    }
    Ok(Json(state.store.download_get_all()?))
}

pub async fn enqueue(State(state): State<Arc<AppState>>, Query(q): Query<RepoFileQuery>) -> ApiResult<Response> {
    let (repo, path) = require_repo_file(&q)?;

    if !catalog_has(&state, repo, path).await? {
        return Err(ApiError(Error::NotFound {
            resource: format!("{repo}/{path} not found in catalog"),
        }));
    }

    if let Some(existing) = state.store.download_get(repo, path)? {
        if existing.status.is_active() || existing.status == DownloadItemStatus::Complete {
            return Ok((StatusCode::from_u16(208).unwrap(), Json(existing)).into_response());
        }
    }

    let row = state.store.download_enqueue(repo, path)?;
    Ok((StatusCode::ACCEPTED, Json(row)).into_response())
}

pub async fn cancel(State(state): State<Arc<AppState>>, Query(q): Query<RepoFileQuery>) -> ApiResult<Json<DownloadItem>> {
    let (repo, path) = require_repo_file(&q)?;
    let mut row = state.store.download_get(repo, path)?.ok_or_else(|| {
        ApiError(Error::NotFound {
            resource: format!("{repo}/{path}"),
        })
    })?;
    row.status = DownloadItemStatus::Cancelled;
    let saved = state.store.download_set(&row)?;
    Ok(Json(saved))
}

pub async fn reset(State(state): State<Arc<AppState>>, Query(q): Query<RepoFileQuery>) -> ApiResult<Json<DownloadItem>> {
    let (repo, path) = require_repo_file(&q)?;
    let row = state.store.download_get(repo, path)?.ok_or_else(|| {
        ApiError(Error::NotFound {
            resource: format!("{repo}/{path}"),
        })
    })?;
    state.store.download_remove(repo, path)?;
    Ok(Json(row))
}

/// Best-effort check that the catalog's HuggingFace-shaped model listing
/// contains `(repo, path)`. Each entry is `{"id": "<repo>", "siblings":
/// [{"rfilename": "<path>"}, …]}`, per the HF models API this passes through.
async fn catalog_has(state: &AppState, repo: &str, path: &str) -> ApiResult<bool> {
    let catalog = state.catalog.fetch().await?;
    let Some(entries) = catalog.as_array() else {
        return Ok(false);
    };
    Ok(entries.iter().any(|entry| {
        entry.get("id").and_then(|v| v.as_str()) == Some(repo)
            && entry
                .get("siblings")
                .and_then(|v| v.as_array())
                .map(|siblings| {
                    siblings
                        .iter()
                        .any(|s| s.get("rfilename").and_then(|v| v.as_str()) == Some(path))
                })
                .unwrap_or(false)
    }))
}
