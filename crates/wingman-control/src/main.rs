//! Wingman control plane — REST + WebSocket front end over `wingman-core`.
//!
//! Spawns the Download Service, Inference Supervisor, and Telemetry Bus as
//! background tasks, then serves the Control API on `controlPort+1` until
//! shutdown is requested (kill file, `requestedShutdown`, or a client
//! hitting `/api/shutdown`).

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wingman_core::cancel::CancellationToken;
use wingman_core::config::DefaultsConfig;
use wingman_core::download_service::DownloadService;
use wingman_core::inference_supervisor::InferenceSupervisor;
use wingman_core::telemetry::TelemetryBus;
use wingman_core::{Error, Store, WingmanHome};
use wingman_control::server;

/// Exit code that tells the Launcher "the model failed to load; I already
/// told the UI, don't reconcile, just restart me."
const EXIT_MODEL_LOAD_FAILED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "wingman-control")]
#[command(about = "Wingman local inference control plane")]
struct Args {
    /// Inference port passed through to the supervised child process.
    #[arg(long, default_value_t = DefaultsConfig::INFERENCE_PORT)]
    port: u16,

    /// Control API / WebSocket port. Defaults to `port + 1`.
    #[arg(long = "websocket-port")]
    websocket_port: Option<u16>,

    /// Default GPU layer count for inference requests that omit `gpuLayers`.
    #[arg(long, default_value_t = DefaultsConfig::GPU_LAYERS)]
    gpu_layers: i32,

    /// Override for the `.wingman` home directory (tests, or spawned by the launcher).
    #[arg(long)]
    home: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("starting wingman control plane");

    let home = match args.home {
        Some(path) => WingmanHome::at(path),
        None => WingmanHome::resolve_default()?,
    };
    home.ensure_dirs()?;
    info!("home: {}", home.root().display());

    let store = Store::open(home.db_path())?;
    let inference_binary = sibling_binary_path("wingman")?;

    let shutdown = CancellationToken::new();

    let download_service = Arc::new(DownloadService::new(store.clone(), home.clone())?);
    let inference_supervisor = Arc::new(InferenceSupervisor::new(store.clone(), home.clone(), inference_binary));
    let telemetry = Arc::new(TelemetryBus::new(store.clone(), home.clone()));

    let download_task = {
        let service = download_service.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { service.run(shutdown).await })
    };
    let telemetry_task = {
        let bus = telemetry.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bus.run(shutdown).await })
    };
    let inference_task = {
        let supervisor = inference_supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    let control_port = args.websocket_port.unwrap_or(args.port + 1);
    let addr = server::start_server(
        store,
        home,
        download_service,
        inference_supervisor,
        telemetry,
        shutdown.clone(),
        control_port,
        args.gpu_layers,
    )
    .await?;
    info!("control API listening on {addr}");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
        () = wait_for_cancel(shutdown.clone()) => {
            info!("shutdown requested via store/kill-file");
        }
    }

    let _ = download_task.await;
    let _ = telemetry_task.await;
    match inference_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(Error::ModelLoadingException { message })) => {
            error!("inference supervisor stopped on model-load failure: {message}");
            std::process::exit(EXIT_MODEL_LOAD_FAILED);
        }
        Ok(Err(e)) => {
            error!("inference supervisor exited with error: {e}");
            Err(e.into())
        }
        Err(e) => {
            error!("inference supervisor task panicked: {e}");
            Err(e.into())
        }
    }
}

async fn wait_for_cancel(shutdown: CancellationToken) {
    while !shutdown.is_cancelled() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// The inference child is a separate executable (`wingman`/`wingman.exe`)
/// resident next to this binary.
fn sibling_binary_path(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| anyhow::anyhow!("control binary has no parent directory"))?;
    let filename = if cfg!(windows) { format!("{name}.exe") } else { name.to_string() };
    Ok(dir.join(filename))
}
