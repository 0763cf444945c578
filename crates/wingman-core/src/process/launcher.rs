//! Low-level child process spawning, shared by the inference supervisor
//! (launching the GGUF inference binary) and the launcher binary (launching
//! the control-plane binary). Detaches the child onto its own session (Unix
//! `setsid()`) or process group (Windows) so a Ctrl+C delivered to the
//! parent's console doesn't also reach the child.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::info;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Configuration for launching a detached child process.
#[derive(Debug, Clone)]
pub struct ChildLaunchConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub log_file: Option<PathBuf>,
}

impl ChildLaunchConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            log_file: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Spawn `config` as a detached child. On Unix the child becomes its own
/// session leader via `setsid()` so that killing it doesn't leave a zombie
/// tied to our process group; on Windows it gets its own process group.
pub fn spawn_detached(config: &ChildLaunchConfig) -> Result<Child> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);
    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    if let Some(ref log_file) = config.log_file {
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = std::fs::File::create(log_file).map_err(|e| Error::io_with_path(e, log_file))?;
        let stderr_file = file.try_clone().map_err(|e| Error::io_with_path(e, log_file))?;
        cmd.stdout(Stdio::from(file));
        cmd.stderr(Stdio::from(stderr_file));
    } else {
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
    }

    #[cfg(unix)]
    {
        // SAFETY: setsid() is async-signal-safe and only runs in the forked
        // child before exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    info!("spawning {} {:?}", config.program.display(), config.args);
    cmd.spawn().map_err(|e| Error::Other(format!("failed to spawn {}: {e}", config.program.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spawn_detached_true_binary() {
        let config = ChildLaunchConfig::new("/usr/bin/true").with_args(vec![]);
        let mut child = spawn_detached(&config).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_writes_log_file() {
        let tmp = TempDir::new().unwrap();
        let log_path = tmp.path().join("child.log");
        let config = ChildLaunchConfig::new("/bin/echo")
            .with_args(vec!["hello".to_string()])
            .with_log_file(&log_path);
        let mut child = spawn_detached(&config).unwrap();
        child.wait().await.unwrap();
        assert!(log_path.exists());
    }
}
