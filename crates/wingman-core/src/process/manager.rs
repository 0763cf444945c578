//! Cross-platform process termination: SIGTERM then SIGKILL escalation on
//! Unix, `taskkill` on Windows.

use std::time::Duration;
use tracing::{info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Send a graceful-then-forceful termination to `pid`, waiting up to
/// `timeout` between the two. Returns whether the process appeared to stop.
pub async fn terminate_process(pid: u32, timeout: Duration) -> bool {
    #[cfg(unix)]
    {
        let nix_pid = Pid::from_raw(pid as i32);
        if signal::kill(nix_pid, Signal::SIGTERM).is_err() {
            // Already gone.
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if signal::kill(nix_pid, None).is_err() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        warn!("pid {pid} still alive after SIGTERM, sending SIGKILL");
        let _ = signal::kill(nix_pid, Signal::SIGKILL);
        true
    }

    #[cfg(windows)]
    {
        info!("terminating pid {pid} via taskkill");
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F", "/T"])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_nonexistent_pid_is_noop() {
        // A PID this high is very unlikely to exist; should report "stopped".
        assert!(terminate_process(u32::MAX - 1, Duration::from_millis(50)).await);
    }
}
