//! Persistent entities and their wire/storage envelopes.
//!
//! These mirror the original Wingman C++ structs (`types.h`) field-for-field,
//! minus source-specific debug fields (e.g. the `"isa"` discriminator) that
//! have no bearing on behavior.

use serde::{Deserialize, Serialize};

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Key/value row scoped by `(name, key)`, used to persist per-service status
/// snapshots as a JSON-encoded value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppItem {
    pub name: String,
    #[serde(default = "default_app_key")]
    pub key: String,
    pub value: String,
    pub enabled: bool,
    pub created: i64,
    pub updated: i64,
}

fn default_app_key() -> String {
    "default".to_string()
}

impl AppItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let now = now_unix();
        Self {
            name: name.into(),
            key: default_app_key(),
            value: value.into(),
            enabled: true,
            created: now,
            updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DownloadItemStatus {
    Idle,
    Queued,
    Downloading,
    Complete,
    Error,
    Cancelled,
    Unknown,
}

impl DownloadItemStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Downloading)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "queued" => Self::Queued,
            "downloading" => Self::Downloading,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

/// One row per `(modelRepo, filePath)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub model_repo: String,
    pub file_path: String,
    pub status: DownloadItemStatus,
    pub total_bytes: i64,
    pub downloaded_bytes: i64,
    pub download_speed: String,
    /// 0..100, or -1 if unknown.
    pub progress: f64,
    pub error: Option<String>,
    /// Opaque JSON text populated by the Metadata collaborator on completion.
    pub metadata: Option<String>,
    pub created: i64,
    pub updated: i64,
}

impl DownloadItem {
    pub fn new_queued(model_repo: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = now_unix();
        Self {
            model_repo: model_repo.into(),
            file_path: file_path.into(),
            status: DownloadItemStatus::Queued,
            total_bytes: 0,
            downloaded_bytes: 0,
            download_speed: "0 B/s".to_string(),
            progress: 0.0,
            error: None,
            metadata: None,
            created: now,
            updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WingmanItemStatus {
    Queued,
    Preparing,
    Inferring,
    Complete,
    Error,
    Cancelling,
    Unknown,
}

impl WingmanItemStatus {
    /// `queued`, `preparing`, `inferring` — the statuses counted by the
    /// single-active-inference invariant.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Preparing | Self::Inferring)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Preparing => "preparing",
            Self::Inferring => "inferring",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelling => "cancelling",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "preparing" => Self::Preparing,
            "inferring" => Self::Inferring,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "cancelling" => Self::Cancelling,
            _ => Self::Unknown,
        }
    }
}

/// One row per user-chosen `alias` (primary key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WingmanItem {
    pub alias: String,
    pub status: WingmanItemStatus,
    pub model_repo: String,
    pub file_path: String,
    pub address: String,
    pub port: u16,
    /// 0 = use model default.
    pub context_size: u32,
    /// -1 = auto.
    pub gpu_layers: i32,
    pub force: bool,
    pub error: Option<String>,
    pub created: i64,
    pub updated: i64,
}

impl WingmanItem {
    pub fn new_queued(
        alias: impl Into<String>,
        model_repo: impl Into<String>,
        file_path: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        context_size: u32,
        gpu_layers: i32,
    ) -> Self {
        let now = now_unix();
        Self {
            alias: alias.into(),
            status: WingmanItemStatus::Queued,
            model_repo: model_repo.into(),
            file_path: file_path.into(),
            address: address.into(),
            port,
            context_size,
            gpu_layers,
            force: false,
            error: None,
            created: now,
            updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ServiceStatus {
    Starting,
    Preparing,
    Ready,
    Downloading,
    Inferring,
    Stopping,
    Stopped,
    Error,
}

/// JSON envelope persisted inside `AppItem.value` for name `"DownloadService"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadServiceAppItem {
    pub status: ServiceStatus,
    pub error: Option<String>,
    pub created: i64,
    pub updated: i64,
    pub current_download: Option<DownloadItem>,
}

impl DownloadServiceAppItem {
    pub fn new(status: ServiceStatus) -> Self {
        let now = now_unix();
        Self {
            status,
            error: None,
            created: now,
            updated: now,
            current_download: None,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// JSON envelope persisted inside `AppItem.value` for name `"WingmanService"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WingmanServiceAppItem {
    pub status: ServiceStatus,
    pub error: Option<String>,
    pub created: i64,
    pub updated: i64,
}

impl WingmanServiceAppItem {
    pub fn new(status: ServiceStatus) -> Self {
        let now = now_unix();
        Self {
            status,
            error: None,
            created: now,
            updated: now,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// AppItem name constants for the two service envelopes.
pub const DOWNLOAD_SERVICE_APP_NAME: &str = "DownloadService";
pub const WINGMAN_SERVICE_APP_NAME: &str = "WingmanService";

const REPO_SEP: &str = "[-]";
const FIELD_SEP: &str = "[=]";

/// Flatten `(modelRepo, filePath)` into the on-disk filename, replacing `/`
/// in `modelRepo` with `[-]` and joining with `[=]`.
///
/// Bijective for any `(repo, path)` pair where neither string already
/// contains `[-]` or `[=]`.
pub fn safe_name(model_repo: &str, file_path: &str) -> String {
    format!("{}{}{}", model_repo.replace('/', REPO_SEP), FIELD_SEP, file_path)
}

/// Inverse of [`safe_name`]. Returns `None` if the filename lacks the `[=]`
/// separator (i.e. it isn't a flattened model filename).
pub fn parse_safe_name(filename: &str) -> Option<(String, String)> {
    let (repo_part, file_path) = filename.split_once(FIELD_SEP)?;
    let model_repo = repo_part.replace(REPO_SEP, "/");
    Some((model_repo, file_path.to_string()))
}

/// Resolve the HuggingFace download URL for a `(modelRepo, filePath)` pair.
pub fn resolve_hf_url(model_repo: &str, file_path: &str) -> String {
    format!(
        "{}/{}/resolve/main/{}",
        crate::config::NetworkConfig::HF_FILE_BASE,
        model_repo,
        file_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_name_roundtrip() {
        let repo = "TheBloke/Foo-GGUF";
        let path = "foo.Q4_0.gguf";
        let name = safe_name(repo, path);
        assert_eq!(name, "TheBloke[-]Foo-GGUF[=]foo.Q4_0.gguf");

        let (parsed_repo, parsed_path) = parse_safe_name(&name).unwrap();
        assert_eq!(parsed_repo, repo);
        assert_eq!(parsed_path, path);
    }

    #[test]
    fn test_parse_safe_name_rejects_plain_filenames() {
        assert!(parse_safe_name("default.gguf").is_none());
        assert!(parse_safe_name("no-separator-here.gguf").is_none());
    }

    #[test]
    fn test_resolve_hf_url() {
        let url = resolve_hf_url("TheBloke/Foo-GGUF", "foo.Q4_0.gguf");
        assert_eq!(
            url,
            "https://huggingface.co/TheBloke/Foo-GGUF/resolve/main/foo.Q4_0.gguf"
        );
    }

    #[test]
    fn test_download_item_status_roundtrip() {
        for s in [
            DownloadItemStatus::Idle,
            DownloadItemStatus::Queued,
            DownloadItemStatus::Downloading,
            DownloadItemStatus::Complete,
            DownloadItemStatus::Error,
            DownloadItemStatus::Cancelled,
        ] {
            assert_eq!(DownloadItemStatus::parse(s.as_str()), s);
        }
    }

    #[test]
    fn test_wingman_item_status_active() {
        assert!(WingmanItemStatus::Queued.is_active());
        assert!(WingmanItemStatus::Preparing.is_active());
        assert!(WingmanItemStatus::Inferring.is_active());
        assert!(!WingmanItemStatus::Complete.is_active());
        assert!(!WingmanItemStatus::Error.is_active());
        assert!(!WingmanItemStatus::Cancelling.is_active());
    }

    #[test]
    fn test_service_envelope_json_roundtrip() {
        let item = WingmanServiceAppItem::new(ServiceStatus::Ready);
        let json = item.to_json().unwrap();
        let back = WingmanServiceAppItem::from_json(&json).unwrap();
        assert_eq!(item, back);
    }
}
