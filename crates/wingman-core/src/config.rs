//! Centralized configuration for wingman-core.
//!
//! Constants only; the Wingman home directory itself is resolved once at
//! startup and threaded through as an explicit value (see `WingmanHome`),
//! never read from a global.

use std::path::PathBuf;
use std::time::Duration;

/// Tick intervals for the background loops.
pub struct TimingConfig;

impl TimingConfig {
    /// Download Service / Inference Supervisor main loop tick.
    pub const QUEUE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
    /// Download cancellation watcher tick.
    pub const DOWNLOAD_CANCEL_WATCH_INTERVAL: Duration = Duration::from_secs(1);
    /// Inference cancellation watcher tick.
    pub const INFERENCE_CANCEL_WATCH_INTERVAL: Duration = Duration::from_millis(333);
    /// Runtime-monitor telemetry gather tick.
    pub const RUNTIME_MONITOR_INTERVAL: Duration = Duration::from_millis(250);
    /// Telemetry queue drain / broadcast tick.
    pub const TELEMETRY_DRAIN_INTERVAL: Duration = Duration::from_millis(1000);
    /// Minimum interval between persisted download progress commits.
    pub const PROGRESS_COMMIT_DEBOUNCE: Duration = Duration::from_secs(3);
}

/// Shutdown / wait timeouts.
pub struct TimeoutConfig;

impl TimeoutConfig {
    /// Launcher's wait for the control plane to exit after a graceful shutdown request.
    pub const LAUNCHER_SHUTDOWN_WAIT: Duration = Duration::from_secs(20);
    /// Control API's bounded wait for an active inference row to reach `complete`.
    pub const INFERENCE_SWITCH_WAIT: Duration = Duration::from_secs(30);
    /// Runtime-monitor's hard-exit deadline once shutdown has been requested.
    pub const FORCE_EXIT_DEADLINE: Duration = Duration::from_secs(15);
    /// Store busy-retry backoff.
    pub const STORE_BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);
    pub const STORE_BUSY_RETRY_ATTEMPTS: u32 = 5;
}

/// Default values used when a Control API request omits optional parameters.
pub struct DefaultsConfig;

impl DefaultsConfig {
    pub const INFERENCE_PORT: u16 = 6567;
    pub const CONTROL_PORT: u16 = 6568;
    pub const CONTEXT_SIZE: u32 = 0;
    pub const GPU_LAYERS: i32 = -1;
    /// "Auto" gpu layers is resolved to this starting value before any halving retries.
    pub const GPU_LAYERS_AUTO_START: i32 = 99;
    pub const ADDRESS: &'static str = "localhost";
}

/// Fixed filesystem layout, rooted at the Wingman home directory.
pub struct PathsConfig;

impl PathsConfig {
    pub const HOME_SUFFIX: &'static str = ".wingman";
    pub const DATA_DIR_NAME: &'static str = "data";
    pub const DB_FILE_NAME: &'static str = "wingman.db";
    pub const LOGS_DIR_NAME: &'static str = "logs";
    pub const METRICS_LOG_FILE_NAME: &'static str = "timing_metrics.json";
    pub const MODELS_DIR_NAME: &'static str = "models";
    pub const KILL_FILE_NAME: &'static str = "wingman.die";
}

/// Network-facing constants.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const HF_FILE_BASE: &'static str = "https://huggingface.co";
    pub const HF_CATALOG_URL: &'static str =
        "https://huggingface.co/api/models?author=TheBloke&search=-GGUF&sort=lastModified&direction=-1&full=full&limit=100";
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CATALOG_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const MAX_SUBSCRIBER_BUFFER_BYTES: usize = 128 * 1024 * 1024;
    /// Suffix used for the in-progress download file, renamed away on completion.
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Resolved Wingman home directory plus the fixed subpaths derived from it.
///
/// Constructed once at startup from `$HOME`/`%USERPROFILE%` (or an explicit
/// override, e.g. `--home` / a test's `TempDir`), then threaded through every
/// service instead of being read from a global.
#[derive(Debug, Clone)]
pub struct WingmanHome {
    root: PathBuf,
}

impl WingmanHome {
    /// Resolve the default home directory: `$HOME/.wingman` (POSIX) or
    /// `%USERPROFILE%/.wingman` (Windows).
    pub fn resolve_default() -> crate::error::Result<Self> {
        let base = dirs::home_dir().ok_or_else(|| crate::error::Error::Config {
            message: "could not resolve $HOME/%USERPROFILE%".to_string(),
        })?;
        Ok(Self::at(base.join(PathsConfig::HOME_SUFFIX)))
    }

    /// Use an explicit root directory (tests, `--home` override).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::DATA_DIR_NAME)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(PathsConfig::DB_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join(PathsConfig::LOGS_DIR_NAME)
    }

    pub fn metrics_log_path(&self) -> PathBuf {
        self.logs_dir().join(PathsConfig::METRICS_LOG_FILE_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join(PathsConfig::MODELS_DIR_NAME)
    }

    pub fn kill_file_path(&self) -> PathBuf {
        self.models_dir().join(PathsConfig::KILL_FILE_NAME)
    }

    /// Ensure `data/`, `data/logs/`, and `models/` exist.
    pub fn ensure_dirs(&self) -> crate::error::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.models_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wingman_home_paths() {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().join(".wingman"));
        home.ensure_dirs().unwrap();

        assert!(home.logs_dir().ends_with("data/logs"));
        assert!(home.db_path().ends_with("data/wingman.db"));
        assert!(home.models_dir().exists());
        assert!(home.kill_file_path().ends_with("wingman.die"));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DefaultsConfig::INFERENCE_PORT, 6567);
        assert_eq!(DefaultsConfig::CONTROL_PORT, 6568);
        assert_eq!(DefaultsConfig::GPU_LAYERS, -1);
    }
}
