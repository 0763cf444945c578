//! Telemetry Bus: samples store state at 250ms, drains/broadcasts at 1000ms
//! to WebSocket subscribers, and watches for the kill-file / shutdown
//! request that the launcher (or a client) can raise. One producer task
//! fans state out to N long-lived subscribers via `tokio::sync::broadcast`.

use crate::cancel::CancellationToken;
use crate::config::{TimingConfig, TimeoutConfig, WingmanHome};
use crate::error::Result;
use crate::model::{
    DownloadItem, DownloadServiceAppItem, WingmanItem, WingmanItemStatus, WingmanServiceAppItem,
    DOWNLOAD_SERVICE_APP_NAME, WINGMAN_SERVICE_APP_NAME,
};
use crate::store::Store;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// One of the five named JSON object shapes a WebSocket subscriber receives.
/// Each variant serializes as `{"<Name>": <payload>}` — a single top-level
/// key naming the collection, per the wire schema.
#[derive(Debug, Clone, Serialize)]
pub enum TelemetryMessage {
    WingmanService(WingmanServiceAppItem),
    DownloadService(DownloadServiceAppItem),
    WingmanItems(Vec<WingmanItem>),
    DownloadItems(Vec<DownloadItem>),
    #[serde(rename = "currentWingmanInferenceItem")]
    CurrentWingmanInferenceItem(CurrentInferenceItem),
}

/// Serializes as the item itself, or `{}` when nothing is inferring.
#[derive(Debug, Clone)]
pub struct CurrentInferenceItem(pub Option<WingmanItem>);

impl Serialize for CurrentInferenceItem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.0 {
            Some(item) => item.serialize(serializer),
            None => serde::Serialize::serialize(&serde_json::Map::new(), serializer),
        }
    }
}

struct Snapshot {
    wingman_service: Option<WingmanServiceAppItem>,
    download_service: Option<DownloadServiceAppItem>,
    downloads: Vec<DownloadItem>,
    wingman: Vec<WingmanItem>,
    inferring: Option<WingmanItem>,
}

pub struct TelemetryBus {
    store: Store,
    home: WingmanHome,
    tx: broadcast::Sender<TelemetryMessage>,
    metrics_log_first_entry: AtomicBool,
}

impl TelemetryBus {
    pub fn new(store: Store, home: WingmanHome) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            store,
            home,
            tx,
            metrics_log_first_entry: AtomicBool::new(true),
        }
    }

    /// Subscribe to the broadcast stream. Each subscriber is expected to
    /// enforce its own `NetworkConfig::MAX_SUBSCRIBER_BUFFER_BYTES` cap when
    /// serializing onto its WebSocket connection.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryMessage> {
        self.tx.subscribe()
    }

    /// Run the sampler, drain/broadcast, and shutdown-watch loops until
    /// `shutdown` is cancelled (or the kill-file / requestedShutdown signal
    /// fires it from the inside).
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.restart_metrics_log();

        let (snapshot_tx, snapshot_rx) = mpsc::channel(4);

        let sampler_self = self.clone();
        let sampler_shutdown = shutdown.clone();
        tokio::spawn(async move { sampler_self.run_sampler(snapshot_tx, sampler_shutdown).await });

        let watch_self = self.clone();
        let watch_shutdown = shutdown.clone();
        tokio::spawn(async move { watch_self.run_shutdown_watch(watch_shutdown).await });

        self.run_drain(snapshot_rx, shutdown).await;
        self.close_metrics_log();
        Ok(())
    }

    async fn run_sampler(&self, tx: mpsc::Sender<Snapshot>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(TimingConfig::RUNTIME_MONITOR_INTERVAL);
        while !shutdown.is_cancelled() {
            ticker.tick().await;
            match self.sample() {
                Ok(snapshot) => {
                    // Bounded queue: drop the sample if the drain loop is behind.
                    let _ = tx.try_send(snapshot);
                }
                Err(e) => warn!("telemetry sample failed: {e}"),
            }
        }
    }

    fn sample(&self) -> Result<Snapshot> {
        let wingman_service = self
            .store
            .app_get(WINGMAN_SERVICE_APP_NAME)?
            .and_then(|row| WingmanServiceAppItem::from_json(&row.value).ok());
        let download_service = self
            .store
            .app_get(DOWNLOAD_SERVICE_APP_NAME)?
            .and_then(|row| DownloadServiceAppItem::from_json(&row.value).ok());
        let downloads = self.store.download_get_all()?;
        let wingman = self.store.wingman_get_all()?;
        let inferring = wingman.iter().find(|w| w.status == WingmanItemStatus::Inferring).cloned();
        Ok(Snapshot {
            wingman_service,
            download_service,
            downloads,
            wingman,
            inferring,
        })
    }

    async fn run_drain(&self, mut rx: mpsc::Receiver<Snapshot>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(TimingConfig::TELEMETRY_DRAIN_INTERVAL);
        loop {
            ticker.tick().await;
            if shutdown.is_cancelled() {
                return;
            }

            let mut latest = None;
            while let Ok(snapshot) = rx.try_recv() {
                latest = Some(snapshot);
            }
            let Some(snapshot) = latest else { continue };

            // No subscribers is a normal, non-error state for every send below.
            if let Some(wingman_service) = snapshot.wingman_service {
                let msg = TelemetryMessage::WingmanService(wingman_service);
                self.log_metrics(&msg);
                let _ = self.tx.send(msg);
            }
            if let Some(download_service) = snapshot.download_service {
                let msg = TelemetryMessage::DownloadService(download_service);
                self.log_metrics(&msg);
                let _ = self.tx.send(msg);
            }
            let msg = TelemetryMessage::WingmanItems(snapshot.wingman);
            self.log_metrics(&msg);
            let _ = self.tx.send(msg);

            let msg = TelemetryMessage::DownloadItems(snapshot.downloads);
            self.log_metrics(&msg);
            let _ = self.tx.send(msg);

            let msg = TelemetryMessage::CurrentWingmanInferenceItem(CurrentInferenceItem(snapshot.inferring));
            self.log_metrics(&msg);
            let _ = self.tx.send(msg);
        }
    }

    /// Truncates the metrics log and opens it with a JSON array.
    /// `log_metrics` appends one array element per drained message;
    /// `close_metrics_log` writes the terminal `]` on shutdown.
    fn restart_metrics_log(&self) {
        self.metrics_log_first_entry.store(true, Ordering::SeqCst);
        let path = self.home.metrics_log_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::File::create(&path) {
            Ok(mut file) => {
                let _ = write!(file, "[");
            }
            Err(e) => warn!("failed to restart metrics log: {e}"),
        }
    }

    fn log_metrics(&self, message: &TelemetryMessage) {
        let Ok(json) = serde_json::to_string(message) else { return };
        let path = self.home.metrics_log_path();
        match std::fs::OpenOptions::new().append(true).open(&path) {
            Ok(mut file) => {
                let first = self.metrics_log_first_entry.swap(false, Ordering::SeqCst);
                let prefix = if first { "" } else { "," };
                let _ = write!(file, "{prefix}{json}");
            }
            Err(e) => warn!("failed to append to metrics log: {e}"),
        }
    }

    fn close_metrics_log(&self) {
        let path = self.home.metrics_log_path();
        match std::fs::OpenOptions::new().append(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "]");
            }
            Err(e) => warn!("failed to close metrics log: {e}"),
        }
    }

    /// Polls for the kill-file or a `requestedShutdown` app flag and
    /// cancels `shutdown` when seen; force-exits the process if graceful
    /// shutdown hasn't completed within the hard deadline.
    async fn run_shutdown_watch(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(TimingConfig::RUNTIME_MONITOR_INTERVAL);
        loop {
            ticker.tick().await;
            if shutdown.is_cancelled() {
                return;
            }

            let kill_file_present = self.home.kill_file_path().exists();
            let requested = self
                .store
                .app_get("requestedShutdown")
                .ok()
                .flatten()
                .map(|item| item.value == "true")
                .unwrap_or(false);

            if kill_file_present || requested {
                info!("shutdown signal observed (kill_file={kill_file_present}, requested={requested})");
                shutdown.cancel();

                let deadline_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(TimeoutConfig::FORCE_EXIT_DEADLINE).await;
                    if !deadline_shutdown.is_cancelled() {
                        return;
                    }
                    error!("graceful shutdown did not complete within the hard deadline, exiting");
                    std::process::exit(0);
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sample_includes_inferring_item() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        let store = Store::open(home.db_path()).unwrap();

        let mut item = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        item.status = WingmanItemStatus::Inferring;
        store.wingman_set(&item).unwrap();

        let bus = TelemetryBus::new(store, home);
        let snapshot = bus.sample().unwrap();
        assert!(snapshot.inferring.is_some());
        assert_eq!(snapshot.inferring.unwrap().alias, "A");
    }

    #[tokio::test]
    async fn test_subscribe_receives_broadcast() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        let store = Store::open(home.db_path()).unwrap();

        let bus = TelemetryBus::new(store, home);
        let mut rx = bus.subscribe();
        bus.tx
            .send(TelemetryMessage::CurrentWingmanInferenceItem(CurrentInferenceItem(None)))
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg,
            TelemetryMessage::CurrentWingmanInferenceItem(CurrentInferenceItem(None))
        ));
    }

    #[test]
    fn test_metrics_log_is_a_json_array_of_drained_messages() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        let store = Store::open(home.db_path()).unwrap();

        let bus = TelemetryBus::new(store, home);
        bus.restart_metrics_log();
        bus.log_metrics(&TelemetryMessage::CurrentWingmanInferenceItem(CurrentInferenceItem(None)));
        bus.log_metrics(&TelemetryMessage::WingmanItems(vec![]));
        bus.close_metrics_log();

        let contents = std::fs::read_to_string(bus.home.metrics_log_path()).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_restart_metrics_log_truncates_prior_contents() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        let store = Store::open(home.db_path()).unwrap();

        let bus = TelemetryBus::new(store, home);
        bus.restart_metrics_log();
        bus.log_metrics(&TelemetryMessage::WingmanItems(vec![]));
        bus.close_metrics_log();

        bus.restart_metrics_log();
        bus.log_metrics(&TelemetryMessage::DownloadItems(vec![]));
        bus.close_metrics_log();

        let contents = std::fs::read_to_string(bus.home.metrics_log_path()).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 1);
    }
}
