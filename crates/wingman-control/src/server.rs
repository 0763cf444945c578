//! HTTP + WebSocket server wiring: router construction, CORS, shared state.

use crate::handlers;
use crate::ws::ws_handler;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;
use wingman_core::cancel::CancellationToken;
use wingman_core::catalog::Catalog;
use wingman_core::download_service::DownloadService;
use wingman_core::inference_supervisor::InferenceSupervisor;
use wingman_core::telemetry::TelemetryBus;
use wingman_core::{Store, WingmanHome};

/// Shared across every HTTP/WS handler. The `start_mutex` enforces the
/// Control API's start-semantics step 1: only one `/api/inference/start`
/// request may be mid-flight at a time.
pub struct AppState {
    pub store: Store,
    pub home: WingmanHome,
    pub catalog: Catalog,
    pub download_service: Arc<DownloadService>,
    pub inference_supervisor: Arc<InferenceSupervisor>,
    pub telemetry: Arc<TelemetryBus>,
    pub shutdown: CancellationToken,
    pub start_mutex: Mutex<()>,
    pub default_gpu_layers: i32,
}

/// Build the router and bind it, returning the bound address. The server
/// keeps running in a background task after this returns.
#[allow(clippy::too_many_arguments)]
pub async fn start_server(
    store: Store,
    home: WingmanHome,
    download_service: Arc<DownloadService>,
    inference_supervisor: Arc<InferenceSupervisor>,
    telemetry: Arc<TelemetryBus>,
    shutdown: CancellationToken,
    port: u16,
    default_gpu_layers: i32,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState {
        store,
        home,
        catalog: Catalog::new()?,
        download_service,
        inference_supervisor,
        telemetry,
        shutdown,
        start_mutex: Mutex::new(()),
        default_gpu_layers,
    });

    // Every JSON response carries these exact headers.
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/models", get(handlers::models::list_models))
        .route("/api/downloads", get(handlers::downloads::list))
        .route("/api/downloads/enqueue", get(handlers::downloads::enqueue))
        .route("/api/downloads/cancel", get(handlers::downloads::cancel))
        .route("/api/downloads/reset", get(handlers::downloads::reset))
        .route("/api/inference", get(handlers::inference::list))
        .route("/api/inference/start", get(handlers::inference::start))
        .route("/api/inference/stop", get(handlers::inference::stop))
        .route("/api/inference/status", get(handlers::inference::list))
        .route("/api/inference/reset", get(handlers::inference::reset))
        .route("/api/shutdown", get(handlers::shutdown::shutdown))
        .route("/api/utils/log", post(handlers::utils_log::log))
        // WebSocket on the same port at path /*: any path not
        // claimed by a REST route above is treated as a WS upgrade attempt.
        .fallback(ws_handler)
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("control API listening on {actual_addr}");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("control API server error");
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wingman_core::download_service::DownloadService;
    use wingman_core::inference_supervisor::InferenceSupervisor;
    use wingman_core::telemetry::TelemetryBus;

    #[tokio::test]
    async fn test_server_starts_and_health_responds() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        let store = Store::open(home.db_path()).unwrap();

        let download_service = Arc::new(DownloadService::new(store.clone(), home.clone()).unwrap());
        let inference_supervisor = Arc::new(InferenceSupervisor::new(store.clone(), home.clone(), "/bin/true"));
        let telemetry = Arc::new(TelemetryBus::new(store.clone(), home.clone()));

        let addr = start_server(
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
        assert!(addr.port() > 0);

        let body = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(body.status().is_success());
    }
}
