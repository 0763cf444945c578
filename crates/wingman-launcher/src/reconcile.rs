//! Crash reconciliation: after the control plane exits with anything other
//! than the model-load-failure code, inspect what it was last doing and
//! mark any still-active inference row with a user-facing error.

use tracing::{info, warn};
use wingman_core::model::{ServiceStatus, WingmanItemStatus, WingmanServiceAppItem, WINGMAN_SERVICE_APP_NAME};
use wingman_core::{Store, WingmanHome};

const PREPARING_OOM_MESSAGE: &str = "There is not enough available memory to load the AI model.";
const INFERRING_OOM_MESSAGE: &str = "The system ran out of memory while running the AI model.";

/// Open the Store directly (the control plane that owned it just died) and,
/// if its last-known status suggests an unreported OOM, mark every active
/// `WingmanItem` with the appropriate user-facing message.
pub fn reconcile_after_crash(home: &WingmanHome) -> anyhow::Result<()> {
    let store = Store::open(home.db_path())?;

    let Some(envelope) = store.app_get(WINGMAN_SERVICE_APP_NAME)? else {
        return Ok(());
    };
    let Ok(service) = WingmanServiceAppItem::from_json(&envelope.value) else {
        return Ok(());
    };

    let message = match service.status {
        ServiceStatus::Preparing => Some(PREPARING_OOM_MESSAGE),
        ServiceStatus::Inferring => Some(INFERRING_OOM_MESSAGE),
        _ => None,
    };
    let Some(message) = message else {
        return Ok(());
    };

    if service.error.as_deref().is_some_and(|e| e.contains("error code 1024")) {
        info!("control plane reported error code 1024 already; no reconciliation needed");
        return Ok(());
    }

    let active = store.wingman_get_all_active()?;
    if active.is_empty() {
        return Ok(());
    }

    warn!(
        "control plane died mid-{}, marking {} active row(s) as error",
        service.status_label(),
        active.len()
    );
    for mut item in active {
        item.status = WingmanItemStatus::Error;
        item.error = Some(message.to_string());
        store.wingman_set(&item)?;
    }
    Ok(())
}

trait StatusLabel {
    fn status_label(&self) -> &'static str;
}

impl StatusLabel for WingmanServiceAppItem {
    fn status_label(&self) -> &'static str {
        match self.status {
            ServiceStatus::Preparing => "preparing",
            ServiceStatus::Inferring => "inferring",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wingman_core::model::WingmanItem;

    fn test_home() -> (TempDir, WingmanHome) {
        let tmp = TempDir::new().unwrap();
        let home = WingmanHome::at(tmp.path().to_path_buf());
        home.ensure_dirs().unwrap();
        (tmp, home)
    }

    #[test]
    fn test_marks_inferring_row_with_runtime_message() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();

        let envelope = WingmanServiceAppItem::new(ServiceStatus::Inferring);
        store.app_set(WINGMAN_SERVICE_APP_NAME, &envelope.to_json().unwrap()).unwrap();

        let mut item = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        item.status = WingmanItemStatus::Inferring;
        store.wingman_set(&item).unwrap();

        reconcile_after_crash(&home).unwrap();

        let row = store.wingman_get("A").unwrap().unwrap();
        assert_eq!(row.status, WingmanItemStatus::Error);
        assert_eq!(row.error.unwrap(), INFERRING_OOM_MESSAGE);
    }

    #[test]
    fn test_skips_reconciliation_when_error_code_1024_already_reported() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();

        let mut envelope = WingmanServiceAppItem::new(ServiceStatus::Preparing);
        envelope.error = Some("model loading failed: error code 1024".to_string());
        store.app_set(WINGMAN_SERVICE_APP_NAME, &envelope.to_json().unwrap()).unwrap();

        let mut item = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        item.status = WingmanItemStatus::Preparing;
        store.wingman_set(&item).unwrap();

        reconcile_after_crash(&home).unwrap();

        let row = store.wingman_get("A").unwrap().unwrap();
        assert_eq!(row.status, WingmanItemStatus::Preparing);
    }

    #[test]
    fn test_no_active_rows_is_noop() {
        let (_tmp, home) = test_home();
        let store = Store::open(home.db_path()).unwrap();
        let envelope = WingmanServiceAppItem::new(ServiceStatus::Inferring);
        store.app_set(WINGMAN_SERVICE_APP_NAME, &envelope.to_json().unwrap()).unwrap();

        reconcile_after_crash(&home).unwrap();
    }
}
