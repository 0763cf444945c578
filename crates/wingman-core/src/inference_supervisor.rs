//! Inference Supervisor: drains the `wingman` queue one alias at a time,
//! launching and retrying the GGUF inference child process per the exit
//! code contract, and enforcing the single-active-inference invariant.
//! Launches and tracks one managed child at a time, holding its
//! `tokio::process::Child` handle directly rather than going through a PID file.

use crate::cancel::CancellationToken;
use crate::config::{DefaultsConfig, TimingConfig, WingmanHome};
use crate::error::{Error, Result};
use crate::model::{
    DownloadItemStatus, ServiceStatus, WingmanItem, WingmanItemStatus, WingmanServiceAppItem,
    WINGMAN_SERVICE_APP_NAME,
};
use crate::process::{self, ChildLaunchConfig};
use crate::store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Exit codes defined by the inference child's contract.
mod exit_code {
    pub const OK: i32 = 0;
    pub const BIND_FAILED: i32 = 1;
    pub const OUT_OF_MEMORY: i32 = 100;
    pub const MODEL_LOAD_FAILED: i32 = 1024;
}

struct ActiveChild {
    alias: String,
    pid: u32,
    user_cancelled: Arc<AtomicBool>,
}

pub struct InferenceSupervisor {
    store: Store,
    home: WingmanHome,
    binary_path: std::path::PathBuf,
    active: Arc<Mutex<Option<ActiveChild>>>,
}

impl InferenceSupervisor {
    pub fn new(store: Store, home: WingmanHome, binary_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store,
            home,
            binary_path: binary_path.into(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.startup()?;

        let watcher_self = self.clone();
        let watcher_shutdown = shutdown.clone();
        tokio::spawn(async move { watcher_self.run_cancel_watcher(watcher_shutdown).await });

        let mut ticker = tokio::time::interval(TimingConfig::QUEUE_CHECK_INTERVAL);
        while !shutdown.is_cancelled() {
            ticker.tick().await;
            match self.tick().await {
                Ok(()) => {}
                Err(e @ Error::ModelLoadingException { .. }) => {
                    error!("inference supervisor stopping: {e}");
                    return Err(e);
                }
                Err(e) => error!("inference supervisor tick failed: {e}"),
            }
        }
        Ok(())
    }

    fn startup(&self) -> Result<()> {
        self.publish_status(ServiceStatus::Starting, None)?;
        self.store.wingman_reset()?;
        self.publish_status(ServiceStatus::Ready, None)?;
        info!("inference supervisor ready");
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        if self.active.lock().await.is_some() {
            return Ok(());
        }
        let Some(next) = self.store.wingman_get_next_queued()? else {
            return Ok(());
        };
        self.process(next).await
    }

    /// Returns `Err(Error::ModelLoadingException { .. })` when the child
    /// reports the model-loading failure class; this is fatal
    /// to the supervisor loop, not just to this item, so the caller must
    /// stop rather than continue ticking.
    async fn process(&self, mut item: WingmanItem) -> Result<()> {
        let model_path = self.home.models_dir().join(crate::model::safe_name(&item.model_repo, &item.file_path));
        let download = self.store.download_get(&item.model_repo, &item.file_path)?;
        if !matches!(download, Some(d) if d.status == DownloadItemStatus::Complete) {
            item.status = WingmanItemStatus::Error;
            item.error = Some(format!("Model file does not exist: {}: {}", item.model_repo, item.file_path));
            self.store.wingman_set(&item)?;
            return Ok(());
        }

        item.status = WingmanItemStatus::Preparing;
        self.store.wingman_set(&item)?;
        self.publish_status(ServiceStatus::Preparing, None)?;

        let mut gpu_layers = if item.gpu_layers < 0 {
            DefaultsConfig::GPU_LAYERS_AUTO_START
        } else {
            item.gpu_layers
        };

        loop {
            let outcome = self.start_and_wait(&item, &model_path, gpu_layers).await?;
            match outcome {
                ChildOutcome::UserCancelled | ChildOutcome::Exited(exit_code::OK) => {
                    item.status = WingmanItemStatus::Complete;
                    item.error = None;
                    self.store.wingman_set(&item)?;
                    break;
                }
                ChildOutcome::Exited(exit_code::OUT_OF_MEMORY) if gpu_layers > 1 => {
                    gpu_layers /= 2;
                    warn!("inference OOM for {}, retrying with {gpu_layers} gpu layers", item.alias);
                    continue;
                }
                ChildOutcome::Exited(exit_code::OUT_OF_MEMORY) => {
                    item.status = WingmanItemStatus::Error;
                    item.error = Some(Error::OutOfMemory.to_string());
                    self.store.wingman_set(&item)?;
                    self.publish_status(ServiceStatus::Error, item.error.clone())?;
                    break;
                }
                ChildOutcome::Exited(exit_code::MODEL_LOAD_FAILED) => {
                    let message =
                        "There is not enough memory available to load the AI model.".to_string();
                    item.status = WingmanItemStatus::Error;
                    item.error = Some(message.clone());
                    self.store.wingman_set(&item)?;
                    self.publish_status(ServiceStatus::Error, Some(message.clone()))?;
                    return Err(Error::ModelLoadingException { message });
                }
                ChildOutcome::Exited(code) => {
                    let message = if code == exit_code::BIND_FAILED {
                        "load/bind/accept failed".to_string()
                    } else {
                        self.tail_log(&item.alias).unwrap_or_default()
                    };
                    item.status = WingmanItemStatus::Error;
                    item.error = Some(Error::ChildFailed { code, message }.to_string());
                    self.store.wingman_set(&item)?;
                    break;
                }
            }
        }

        self.publish_status(ServiceStatus::Ready, None)
    }

    async fn start_and_wait(&self, item: &WingmanItem, model_path: &std::path::Path, gpu_layers: i32) -> Result<ChildOutcome> {
        let log_path = self.home.logs_dir().join(format!("inference-{}.log", item.alias));
        let config = ChildLaunchConfig::new(self.binary_path.clone())
            .with_args(vec![
                "--port".to_string(),
                item.port.to_string(),
                "--ctx-size".to_string(),
                item.context_size.to_string(),
                "--n-gpu-layers".to_string(),
                gpu_layers.to_string(),
                "--model".to_string(),
                model_path.display().to_string(),
                "--alias".to_string(),
                item.alias.clone(),
                "--chat-template".to_string(),
                "chatml".to_string(),
                "--embedding".to_string(),
            ])
            .with_log_file(&log_path);

        let mut child: Child = process::spawn_detached(&config)?;
        let pid = child.id().unwrap_or(0);

        let mut item_db = self.store.wingman_get(&item.alias)?.unwrap_or_else(|| item.clone());
        item_db.status = WingmanItemStatus::Inferring;
        self.store.wingman_set(&item_db)?;
        self.publish_status(ServiceStatus::Inferring, None)?;

        let user_cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut active = self.active.lock().await;
            *active = Some(ActiveChild {
                alias: item.alias.clone(),
                pid,
                user_cancelled: user_cancelled.clone(),
            });
        }

        let status = child.wait().await.map_err(|e| Error::Other(format!("failed to wait on inference child: {e}")))?;
        *self.active.lock().await = None;

        if user_cancelled.load(Ordering::SeqCst) {
            return Ok(ChildOutcome::UserCancelled);
        }
        Ok(ChildOutcome::Exited(status.code().unwrap_or(-1)))
    }

    /// Watches for `cancelling` rows (~3Hz). A row matching the currently
    /// active child is terminated and left for `process()` to finalize; a
    /// row with no active child (e.g. still `queued` when cancelled) has no
    /// process to wait for, so it is finalized to `complete` directly.
    async fn run_cancel_watcher(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(TimingConfig::INFERENCE_CANCEL_WATCH_INTERVAL);
        while !shutdown.is_cancelled() {
            ticker.tick().await;
            let rows = match self.store.wingman_get_all_by_status(WingmanItemStatus::Cancelling) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("cancel watcher failed to read wingman rows: {e}");
                    continue;
                }
            };
            if rows.is_empty() {
                continue;
            }
            let active = self.active.lock().await;
            for row in rows {
                match active.as_ref() {
                    Some(active) if active.alias == row.alias => {
                        active.user_cancelled.store(true, Ordering::SeqCst);
                        let _ = process::terminate_process(active.pid, Duration::from_secs(5)).await;
                    }
                    _ => {
                        let mut row = row;
                        row.status = WingmanItemStatus::Complete;
                        row.error = None;
                        if let Err(e) = self.store.wingman_set(&row) {
                            warn!("cancel watcher failed to finalize {}: {e}", row.alias);
                        }
                    }
                }
            }
        }
    }

    fn tail_log(&self, alias: &str) -> Option<String> {
        let path = self.home.logs_dir().join(format!("inference-{alias}.log"));
        let contents = std::fs::read_to_string(path).ok()?;
        let tail: Vec<&str> = contents.lines().rev().take(20).collect();
        Some(tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
    }

    fn publish_status(&self, status: ServiceStatus, error: Option<String>) -> Result<()> {
        let mut envelope = WingmanServiceAppItem::new(status);
        envelope.error = error;
        self.store.app_set(WINGMAN_SERVICE_APP_NAME, &envelope.to_json()?)?;
        Ok(())
    }
}

enum ChildOutcome {
    UserCancelled,
    Exited(i32),
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
    async fn test_missing_model_file_marks_error() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let supervisor = InferenceSupervisor::new(store.clone(), home, "/bin/true");

        let item = WingmanItem::new_queued("A", "R/1", "missing.gguf", "localhost", 6567, 0, -1);
        store.wingman_set(&item).unwrap();

        supervisor.process(item).await.unwrap();

        let row = store.wingman_get("A").unwrap().unwrap();
        assert_eq!(row.status, WingmanItemStatus::Error);
        assert!(row.error.unwrap().contains("Model file does not exist: R/1: missing.gguf"));
    }

    #[tokio::test]
    async fn test_cancel_watcher_finalizes_row_with_no_active_child() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let supervisor = Arc::new(InferenceSupervisor::new(store.clone(), home, "/bin/true"));

        let mut item = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        item.status = WingmanItemStatus::Cancelling;
        store.wingman_set(&item).unwrap();

        let shutdown = CancellationToken::new();
        let watcher = supervisor.clone();
        let watcher_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move { watcher.run_cancel_watcher(watcher_shutdown).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let row = store.wingman_get("A").unwrap().unwrap();
        assert_eq!(row.status, WingmanItemStatus::Complete);
    }

    #[tokio::test]
    async fn test_startup_publishes_ready() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let supervisor = InferenceSupervisor::new(store.clone(), home, "/bin/true");

        supervisor.startup().unwrap();

        let envelope = store.app_get(WINGMAN_SERVICE_APP_NAME).unwrap().unwrap();
        let parsed = WingmanServiceAppItem::from_json(&envelope.value).unwrap();
        assert_eq!(parsed.status, ServiceStatus::Ready);
    }
}
