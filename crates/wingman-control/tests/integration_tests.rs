//! End-to-end tests against a real bound `wingman-control` server: start it
//! on an ephemeral port, drive it with `reqwest`, assert on status codes and
//! bodies against the Control API's endpoint table.

use std::sync::Arc;
use tempfile::TempDir;
use wingman_core::cancel::CancellationToken;
use wingman_core::download_service::DownloadService;
use wingman_core::inference_supervisor::InferenceSupervisor;
use wingman_core::telemetry::TelemetryBus;
use wingman_core::{Store, WingmanHome};

async fn start_test_server() -> (TempDir, std::net::SocketAddr) {
    let tmp = TempDir::new().unwrap();
    let home = WingmanHome::at(tmp.path().to_path_buf());
    home.ensure_dirs().unwrap();
    let store = Store::open(home.db_path()).unwrap();

    let download_service = Arc::new(DownloadService::new(store.clone(), home.clone()).unwrap());
    let inference_supervisor = Arc::new(InferenceSupervisor::new(store.clone(), home.clone(), "/bin/true"));
    let telemetry = Arc::new(TelemetryBus::new(store.clone(), home.clone()));

    let addr = wingman_control::server::start_server(
        store,
        home,
        download_service,
        inference_supervisor,
        telemetry,
        CancellationToken::new(),
        0,
        -1,
    )
    .await
    .unwrap();

    (tmp, addr)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn downloads_list_is_empty_on_a_fresh_store() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/downloads")).await.unwrap();
    assert!(resp.status().is_success());
    let body: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn downloads_enqueue_rejects_missing_query_params() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/downloads/enqueue")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 422);
}

#[tokio::test]
async fn downloads_cancel_404s_for_unknown_download() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!(
        "http://{addr}/api/downloads/cancel?modelRepo=Nobody/Nothing&filePath=x.gguf"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn inference_list_is_empty_on_a_fresh_store() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/inference")).await.unwrap();
    assert!(resp.status().is_success());
    let body: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn inference_start_404s_when_the_backing_download_is_missing() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!(
        "http://{addr}/api/inference/start?alias=A&modelRepo=Some/Repo&filePath=model.gguf"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn inference_stop_requires_alias() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/inference/stop")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 422);
}

#[tokio::test]
async fn shutdown_sets_the_requested_shutdown_flag() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/shutdown")).await.unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "shutting down");
}

#[tokio::test]
async fn utils_log_accepts_an_arbitrary_json_body() {
    let (_tmp, addr) = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/utils/log"))
        .json(&serde_json::json!({ "level": "info", "message": "client-side log line" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
}
