//! Streaming HTTP fetcher used by the download service.
//!
//! Two modes: [`Fetcher::probe`] does a cheap existence/size check without
//! writing anything, and [`Fetcher::fetch_file`] streams a response body to
//! disk with debounced progress reporting and cooperative cancellation.

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use futures::StreamExt;
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Result of a HEAD-style existence/size probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub exists: bool,
    pub content_length: Option<u64>,
}

/// Streaming HTTP client for model file downloads and catalog passthrough.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT)
            .user_agent("wingman/1.0")
            .build()
            .map_err(|e| Error::NetworkFailure {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(e),
            })?;
        Ok(Self { client })
    }

    /// Check whether `url` resolves and, if so, its `Content-Length`.
    ///
    /// Trusts whatever `Content-Length` the final response carries, including
    /// across redirects — the server is the source of truth here.
    pub async fn probe(&self, url: &str) -> Result<ProbeResult> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Error::NetworkFailure {
                message: format!("HEAD {url} failed: {e}"),
                source: Some(e),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProbeResult {
                exists: false,
                content_length: None,
            });
        }
        if !response.status().is_success() {
            return Err(Error::RemoteMissing { url: url.to_string() });
        }

        Ok(ProbeResult {
            exists: true,
            content_length: response.content_length(),
        })
    }

    /// Stream `url` to `destination`, calling `on_progress(downloaded, total)`
    /// no more than once every [`crate::config::TimingConfig::PROGRESS_COMMIT_DEBOUNCE`],
    /// plus once more on completion. Checks `cancel` between chunks; on
    /// cancellation the partial temp file is removed and
    /// [`Error::CancelledByUser`] is returned.
    pub async fn fetch_file(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(u64, Option<u64>),
    ) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(e, parent))?;
        }

        let temp_path = PathBuf::from(format!(
            "{}{}",
            destination.display(),
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ));

        let result = self.do_fetch(url, &temp_path, cancel, &mut on_progress).await;

        match result {
            Ok(bytes) => {
                std::fs::rename(&temp_path, destination).map_err(|e| {
                    let _ = std::fs::remove_file(&temp_path);
                    Error::io_with_path(e, destination)
                })?;
                info!("fetched {bytes} bytes to {}", destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    async fn do_fetch(
        &self,
        url: &str,
        temp_path: &Path,
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(u64, Option<u64>),
    ) -> Result<u64> {
        let response = self.client.get(url).send().await.map_err(|e| Error::NetworkFailure {
            message: format!("GET {url} failed: {e}"),
            source: Some(e),
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::RemoteMissing { url: url.to_string() });
        }
        if !response.status().is_success() {
            return Err(Error::NetworkFailure {
                message: format!("GET {url} returned {}", response.status()),
                source: None,
            });
        }

        let total_bytes = response.content_length();
        let mut file = std::fs::File::create(temp_path).map_err(|e| Error::io_with_path(e, temp_path))?;
        let mut downloaded: u64 = 0;
        let mut last_report = Instant::now();
        let debounce = crate::config::TimingConfig::PROGRESS_COMMIT_DEBOUNCE;
        let mut stream = response.bytes_stream();

        on_progress(0, total_bytes);

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(Error::CancelledByUser);
            }

            let chunk = chunk.map_err(|e| Error::NetworkFailure {
                message: format!("error reading download stream: {e}"),
                source: Some(e),
            })?;

            file.write_all(&chunk).map_err(|e| Error::io_with_path(e, temp_path))?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= debounce {
                on_progress(downloaded, total_bytes);
                last_report = Instant::now();
            }
        }

        file.flush().map_err(|e| Error::io_with_path(e, temp_path))?;
        on_progress(downloaded, total_bytes);
        Ok(downloaded)
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new().expect("failed to build default Fetcher")
    }
}

/// Elapsed-seconds/bytes-seen speed estimate, reported as a human string
/// (e.g. `"1.2 MB/s"`) matching `DownloadItem.download_speed`.
///
/// Reports `"0 B/s"` for the `now == start` edge case (first sample) rather
/// than dividing by zero.
pub struct SpeedEstimator {
    start: Instant,
    bytes_at_start: u64,
}

impl SpeedEstimator {
    pub fn start(bytes_at_start: u64) -> Self {
        Self {
            start: Instant::now(),
            bytes_at_start,
        }
    }

    pub fn sample(&self, bytes_now: u64) -> String {
        let elapsed = self.start.elapsed();
        if elapsed < Duration::from_millis(1) || bytes_now <= self.bytes_at_start {
            return "0 B/s".to_string();
        }
        let delta = (bytes_now - self.bytes_at_start) as f64;
        let bps = delta / elapsed.as_secs_f64();
        format_bytes_per_sec(bps)
    }
}

fn format_bytes_per_sec(bps: f64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];
    let mut value = bps;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_per_sec() {
        assert_eq!(format_bytes_per_sec(0.0), "0 B/s");
        assert_eq!(format_bytes_per_sec(512.0), "512 B/s");
        assert_eq!(format_bytes_per_sec(1536.0), "1.5 KB/s");
        assert_eq!(format_bytes_per_sec(2.0 * 1024.0 * 1024.0), "2.0 MB/s");
    }

    #[test]
    fn test_speed_estimator_zero_at_start() {
        let est = SpeedEstimator::start(0);
        assert_eq!(est.sample(0), "0 B/s");
    }

    #[tokio::test]
    async fn test_probe_missing_url() {
        let fetcher = Fetcher::new().unwrap();
        // Unroutable host: expect a network failure, not a panic.
        let result = fetcher.probe("http://127.0.0.1:1/missing").await;
        assert!(result.is_err());
    }
}
