//! Download Service: the background worker that drains the `downloads`
//! queue one file at a time and keeps the models directory consistent with
//! the store. Runs as a tokio-spawned loop with a tick interval, driven off
//! the `downloads` table.

use crate::cancel::CancellationToken;
use crate::config::{TimingConfig, WingmanHome};
use crate::error::Result;
use crate::fetcher::{Fetcher, SpeedEstimator};
use crate::metadata::{GgufMetadataExtractor, MetadataExtractor};
use crate::model::{
    self, DownloadItem, DownloadItemStatus, DownloadServiceAppItem, ServiceStatus,
    DOWNLOAD_SERVICE_APP_NAME,
};
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The item currently being fetched, and the token that cancels it.
struct ActiveDownload {
    model_repo: String,
    file_path: String,
    cancel: CancellationToken,
}

pub struct DownloadService {
    store: Store,
    home: WingmanHome,
    fetcher: Fetcher,
    active: Arc<Mutex<Option<ActiveDownload>>>,
}

impl DownloadService {
    pub fn new(store: Store, home: WingmanHome) -> Result<Self> {
        Ok(Self {
            store,
            home,
            fetcher: Fetcher::new()?,
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Run startup (orphan cleanup + crash reconciliation) then the main
    /// 1Hz queue-draining loop, until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.startup().await?;

        let watcher_self = self.clone();
        let watcher_shutdown = shutdown.clone();
        tokio::spawn(async move { watcher_self.run_cancel_watcher(watcher_shutdown).await });

        let mut ticker = tokio::time::interval(TimingConfig::QUEUE_CHECK_INTERVAL);
        while !shutdown.is_cancelled() {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("download service tick failed: {e}");
            }
        }
        Ok(())
    }

    async fn startup(&self) -> Result<()> {
        self.publish_status(ServiceStatus::Starting, None)?;
        self.cleanup_orphans()?;
        self.store.download_reset()?;
        self.publish_status(ServiceStatus::Ready, None)?;
        info!("download service ready");
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        if self.active.lock().await.is_some() {
            return Ok(());
        }
        let Some(next) = self.store.download_get_next_queued()? else {
            return Ok(());
        };
        self.process(next).await
    }

    async fn process(&self, mut item: DownloadItem) -> Result<()> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveDownload {
                model_repo: item.model_repo.clone(),
                file_path: item.file_path.clone(),
                cancel: cancel.clone(),
            });
        }

        item.status = DownloadItemStatus::Downloading;
        item.updated = chrono_now();
        self.store.download_set(&item)?;
        self.publish_status(ServiceStatus::Downloading, Some(item.clone()))?;

        let url = model::resolve_hf_url(&item.model_repo, &item.file_path);
        let destination = self
            .home
            .models_dir()
            .join(model::safe_name(&item.model_repo, &item.file_path));

        let store = self.store.clone();
        let repo = item.model_repo.clone();
        let path = item.file_path.clone();
        let speed = SpeedEstimator::start(0);

        let result = self
            .fetcher
            .fetch_file(&url, &destination, &cancel, move |downloaded, total| {
                let mut row = store
                    .download_get(&repo, &path)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| DownloadItem::new_queued(&repo, &path));
                row.downloaded_bytes = downloaded as i64;
                row.total_bytes = total.map(|t| t as i64).unwrap_or(row.total_bytes);
                row.progress = match total {
                    Some(t) if t > 0 => (downloaded as f64 / t as f64) * 100.0,
                    _ => -1.0,
                };
                row.download_speed = speed.sample(downloaded);
                if let Err(e) = store.download_set(&row) {
                    warn!("failed to persist download progress for {repo}/{path}: {e}");
                }
            })
            .await;

        *self.active.lock().await = None;

        let mut final_item = self.store.download_get(&item.model_repo, &item.file_path)?.unwrap_or(item);
        match result {
            Ok(_bytes) => {
                final_item.status = DownloadItemStatus::Complete;
                final_item.progress = 100.0;
                final_item.error = None;
                final_item.metadata = GgufMetadataExtractor.extract(&destination);
                self.store.download_set(&final_item)?;
                info!(
                    "download complete: {}/{}",
                    final_item.model_repo, final_item.file_path
                );
            }
            Err(crate::error::Error::CancelledByUser) => {
                final_item.status = DownloadItemStatus::Cancelled;
                self.store.download_set(&final_item)?;
                info!(
                    "download cancelled: {}/{}",
                    final_item.model_repo, final_item.file_path
                );
            }
            Err(e) => {
                final_item.status = DownloadItemStatus::Error;
                final_item.error = Some(e.to_string());
                self.store.download_set(&final_item)?;
                warn!(
                    "download failed: {}/{}: {e}",
                    final_item.model_repo, final_item.file_path
                );
            }
        }

        self.publish_status(ServiceStatus::Ready, None)
    }

    /// Watches the store for cancellation requests against the in-flight
    /// download (e.g. the Control API flipping its row to `cancelled` out
    /// from under us) and signals the fetch's token.
    async fn run_cancel_watcher(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(TimingConfig::DOWNLOAD_CANCEL_WATCH_INTERVAL);
        while !shutdown.is_cancelled() {
            ticker.tick().await;
            let active = self.active.lock().await;
            let Some(active) = active.as_ref() else {
                continue;
            };
            match self.store.download_get(&active.model_repo, &active.file_path) {
                Ok(Some(row)) if row.status == DownloadItemStatus::Cancelled => {
                    debug!("cancelling in-flight download {}/{}", active.model_repo, active.file_path);
                    active.cancel.cancel();
                }
                Ok(_) => {}
                Err(e) => warn!("cancel watcher failed to read download row: {e}"),
            }
        }
    }

    /// Reconcile the models directory against the `downloads` table.
    ///
    /// Direction 1: a `complete` row whose backing file is gone is removed.
    /// Direction 2: a file on disk with no matching `complete` row is deleted.
    fn cleanup_orphans(&self) -> Result<()> {
        let models_dir = self.home.models_dir();
        std::fs::create_dir_all(&models_dir).map_err(|e| crate::error::Error::io_with_path(e, &models_dir))?;

        for row in self.store.download_get_all_by_status(DownloadItemStatus::Complete)? {
            let path = models_dir.join(model::safe_name(&row.model_repo, &row.file_path));
            if !path.exists() {
                warn!(
                    "orphaned complete row with no backing file, removing: {}/{}",
                    row.model_repo, row.file_path
                );
                self.store.download_remove(&row.model_repo, &row.file_path)?;
            }
        }

        for entry in walkdir::WalkDir::new(&models_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let Some(filename) = entry.file_name().to_str() else {
                continue;
            };
            let Some((repo, path)) = model::parse_safe_name(filename) else {
                continue;
            };
            let has_complete_row = matches!(
                self.store.download_get(&repo, &path)?,
                Some(row) if row.status == DownloadItemStatus::Complete
            );
            if !has_complete_row {
                warn!("orphaned model file with no complete row, removing: {filename}");
                let _ = std::fs::remove_file(entry.path());
            }
        }

        Ok(())
    }

    fn publish_status(&self, status: ServiceStatus, current_download: Option<DownloadItem>) -> Result<()> {
        let mut envelope = DownloadServiceAppItem::new(status);
        envelope.current_download = current_download;
        self.store.app_set(DOWNLOAD_SERVICE_APP_NAME, &envelope.to_json()?)?;
        Ok(())
    }
}

fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_home() -> (TempDir, WingmanHome) {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        (tmp, home)
    }

    #[tokio::test]
    async fn test_startup_publishes_ready() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let service = DownloadService::new(store.clone(), home).unwrap();

        service.startup().await.unwrap();

        let envelope = store.app_get(DOWNLOAD_SERVICE_APP_NAME).unwrap().unwrap();
        let parsed = DownloadServiceAppItem::from_json(&envelope.value).unwrap();
        assert_eq!(parsed.status, ServiceStatus::Ready);
    }

    #[tokio::test]
    async fn test_cleanup_removes_complete_row_missing_file() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let mut item = DownloadItem::new_queued("A/1", "a.gguf");
        item.status = DownloadItemStatus::Complete;
        store.download_set(&item).unwrap();

        let service = DownloadService::new(store.clone(), home).unwrap();
        service.cleanup_orphans().unwrap();

        assert!(store.download_get("A/1", "a.gguf").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_orphaned_disk_file() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let filename = model::safe_name("A/1", "a.gguf");
        std::fs::write(home.models_dir().join(&filename), b"data").unwrap();

        let service = DownloadService::new(store, home.clone()).unwrap();
        service.cleanup_orphans().unwrap();

        assert!(!home.models_dir().join(&filename).exists());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_complete_row_with_file_present() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let mut item = DownloadItem::new_queued("A/1", "a.gguf");
        item.status = DownloadItemStatus::Complete;
        store.download_set(&item).unwrap();
        let filename = model::safe_name("A/1", "a.gguf");
        std::fs::write(home.models_dir().join(&filename), b"data").unwrap();

        let service = DownloadService::new(store.clone(), home).unwrap();
        service.cleanup_orphans().unwrap();

        assert!(store.download_get("A/1", "a.gguf").unwrap().is_some());
    }
}
