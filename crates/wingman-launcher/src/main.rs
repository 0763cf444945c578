//! Wingman Launcher — crash-resilient supervisor for the control-plane
//! binary. Spawns `wingman-control`, waits for it to exit, decides
//! whether the exit warrants reconciliation, and restarts it; on SIGINT or
//! the kill file it asks the control plane to shut down gracefully instead.

mod reconcile;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wingman_core::config::{DefaultsConfig, TimeoutConfig};
use wingman_core::process::{spawn_detached, terminate_process, ChildLaunchConfig};
use wingman_core::WingmanHome;

/// Exit code `wingman-control` uses to say "I already reported a model-load
/// failure to the UI, don't reconcile me, just restart."
const EXIT_MODEL_LOAD_FAILED: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "wingman-launcher")]
#[command(about = "Supervises the Wingman control plane and reconciles crashes")]
struct Args {
    /// Inference port forwarded to the control plane.
    #[arg(long, default_value_t = DefaultsConfig::INFERENCE_PORT)]
    port: u16,

    /// Control API / WebSocket port forwarded to the control plane.
    #[arg(long = "websocket-port", default_value_t = DefaultsConfig::CONTROL_PORT)]
    websocket_port: u16,

    /// Default GPU layer count forwarded to the control plane.
    #[arg(long, default_value_t = DefaultsConfig::GPU_LAYERS)]
    gpu_layers: i32,

    /// Override for the `.wingman` home directory.
    #[arg(long)]
    home: Option<PathBuf>,

    /// Enable debug logging, forwarded to the control plane too.
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

    let home = match args.home.clone() {
        Some(path) => WingmanHome::at(path),
        None => WingmanHome::resolve_default()?,
    };
    home.ensure_dirs()?;
    info!("home: {}", home.root().display());

    let control_binary = sibling_binary_path("wingman-control")?;
    let shutdown_url = format!("http://127.0.0.1:{}/api/shutdown", args.websocket_port);

    let mut generation: u64 = 0;
    loop {
        generation += 1;
        let log_path = home.logs_dir().join(format!("control-plane-gen-{generation}.log"));
        let child_args = build_child_args(&args);
        info!(generation, "spawning control plane: {} {:?}", control_binary.display(), child_args);

        let config = ChildLaunchConfig::new(&control_binary)
            .with_args(child_args)
            .with_log_file(&log_path);

        let mut child = spawn_detached(&config).context("failed to spawn control plane")?;
        let pid = child.id();

        tokio::select! {
            status = child.wait() => {
                let status = status.context("failed waiting on control plane")?;
                handle_exit(generation, status.code(), &home).await;
            }
            () = wait_for_shutdown_signal(&home) => {
                info!(generation, "shutdown requested, asking control plane to stop gracefully");
                request_graceful_shutdown(&shutdown_url, &mut child, pid).await;
                info!("launcher exiting");
                return Ok(());
            }
        }
    }
}

fn build_child_args(args: &Args) -> Vec<String> {
    let mut out = vec![
        "--port".to_string(),
        args.port.to_string(),
        "--websocket-port".to_string(),
        args.websocket_port.to_string(),
        "--gpu-layers".to_string(),
        args.gpu_layers.to_string(),
    ];
    if let Some(home) = &args.home {
        out.push("--home".to_string());
        out.push(home.display().to_string());
    }
    if args.debug {
        out.push("--debug".to_string());
    }
    out
}

/// After the child exits on its own (not in response to a shutdown request),
/// decide whether to reconcile stranded work, then fall through to the next
/// loop iteration, which respawns it.
async fn handle_exit(generation: u64, code: Option<i32>, home: &WingmanHome) {
    match code {
        Some(EXIT_MODEL_LOAD_FAILED) => {
            info!(generation, "control plane exited after reporting a model-load failure, restarting");
        }
        Some(0) => {
            warn!(generation, "control plane exited cleanly without a shutdown request, restarting");
        }
        other => {
            warn!(generation, "control plane exited unexpectedly (code={other:?}), reconciling");
            if let Err(e) = reconcile::reconcile_after_crash(home) {
                error!("crash reconciliation failed: {e}");
            }
        }
    }
}

/// Watches for either SIGINT or the kill file, whichever comes first.
async fn wait_for_shutdown_signal(home: &WingmanHome) {
    let kill_file = home.kill_file_path();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = async {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                if kill_file.exists() {
                    return;
                }
            }
        } => {}
    }
}

/// Ask the control plane to shut down over HTTP, wait up to the configured
/// deadline for it to exit on its own, and force-kill it if it doesn't.
async fn request_graceful_shutdown(shutdown_url: &str, child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Err(e) = reqwest::Client::new().get(shutdown_url).send().await {
        warn!("shutdown request to control plane failed: {e}");
    }

    let waited = tokio::time::timeout(TimeoutConfig::LAUNCHER_SHUTDOWN_WAIT, child.wait()).await;
    match waited {
        Ok(Ok(status)) => info!("control plane exited ({status})"),
        Ok(Err(e)) => error!("error waiting for control plane to exit: {e}"),
        Err(_) => {
            warn!("control plane did not exit within {:?}, force-killing", TimeoutConfig::LAUNCHER_SHUTDOWN_WAIT);
            if let Some(pid) = pid {
                terminate_process(pid, Duration::from_secs(5)).await;
            }
        }
    }
}

/// The control-plane binary is a separate executable resident next to this one.
fn sibling_binary_path(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| anyhow::anyhow!("launcher binary has no parent directory"))?;
    let filename = if cfg!(windows) { format!("{name}.exe") } else { name.to_string() };
    Ok(dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            port: 6567,
            websocket_port: 6568,
            gpu_layers: -1,
            home: None,
            debug: false,
        }
    }

    #[test]
    fn test_build_child_args_minimal() {
        let args = base_args();
        assert_eq!(
            build_child_args(&args),
            vec!["--port", "6567", "--websocket-port", "6568", "--gpu-layers", "-1"]
        );
    }

    #[test]
    fn test_build_child_args_forwards_home_and_debug() {
        let mut args = base_args();
        args.home = Some(PathBuf::from("/tmp/custom-home"));
        args.debug = true;
        let forwarded = build_child_args(&args);
        assert!(forwarded.contains(&"--home".to_string()));
        assert!(forwarded.contains(&"/tmp/custom-home".to_string()));
        assert!(forwarded.contains(&"--debug".to_string()));
    }

    #[tokio::test]
    async fn test_handle_exit_on_model_load_failure_skips_reconciliation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        // No WingmanService envelope exists; a reconciliation attempt would
        // still no-op, but this exercises the early-return branch explicitly.
        handle_exit(1, Some(EXIT_MODEL_LOAD_FAILED), &home).await;
    }

    #[tokio::test]
    async fn test_handle_exit_on_crash_runs_reconciliation_without_panicking() {
        let tmp = tempfile::TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        handle_exit(1, Some(139), &home).await;
    }
}
