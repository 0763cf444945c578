use super::{now_unix, Store};
use crate::error::Result;
use crate::model::{DownloadItem, DownloadItemStatus};
use rusqlite::{params, OptionalExtension};

impl Store {
    pub fn download_get(&self, model_repo: &str, file_path: &str) -> Result<Option<DownloadItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM downloads WHERE modelRepo = ?1 AND filePath = ?2", DOWNLOAD_COLUMNS),
            params![model_repo, file_path],
            Self::row_to_download_item,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn download_get_all(&self) -> Result<Vec<DownloadItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM downloads ORDER BY created ASC",
            DOWNLOAD_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Self::row_to_download_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn download_get_all_by_status(&self, status: DownloadItemStatus) -> Result<Vec<DownloadItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM downloads WHERE status = ?1 ORDER BY created ASC",
            DOWNLOAD_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_download_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Insert `(modelRepo, filePath)` in `queued` if absent. Returns the
    /// existing row unchanged if it is active or complete; otherwise
    /// (`error`/`cancelled`/`idle`/`unknown`) resets it back to `queued`
    /// with counters zeroed so `download_get_next_queued` picks it up again.
    pub fn download_enqueue(&self, model_repo: &str, file_path: &str) -> Result<DownloadItem> {
        if let Some(existing) = self.download_get(model_repo, file_path)? {
            if existing.status.is_active() || existing.status == DownloadItemStatus::Complete {
                return Ok(existing);
            }
            let item = DownloadItem::new_queued(model_repo, file_path);
            return self.download_set(&item);
        }
        let item = DownloadItem::new_queued(model_repo, file_path);
        self.download_set(&item)
    }

    /// Upsert by `(modelRepo, filePath)`. `updated` is always set to "now".
    pub fn download_set(&self, item: &DownloadItem) -> Result<DownloadItem> {
        let conn = self.lock()?;
        let now = now_unix();

        let existing_created: Option<i64> = conn
            .query_row(
                "SELECT created FROM downloads WHERE modelRepo = ?1 AND filePath = ?2",
                params![item.model_repo, item.file_path],
                |row| row.get(0),
            )
            .optional()?;

        let created = match existing_created {
            Some(created) => {
                conn.execute(
                    r#"UPDATE downloads SET status = ?1, totalBytes = ?2, downloadedBytes = ?3,
                       downloadSpeed = ?4, progress = ?5, error = ?6, metadata = ?7, updated = ?8
                       WHERE modelRepo = ?9 AND filePath = ?10"#,
                    params![
                        item.status.as_str(),
                        item.total_bytes,
                        item.downloaded_bytes,
                        item.download_speed,
                        item.progress,
                        item.error,
                        item.metadata,
                        now,
                        item.model_repo,
                        item.file_path,
                    ],
                )?;
                created
            }
            None => {
                conn.execute(
                    r#"INSERT INTO downloads
                       (modelRepo, filePath, status, totalBytes, downloadedBytes, downloadSpeed,
                        progress, error, metadata, created, updated)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)"#,
                    params![
                        item.model_repo,
                        item.file_path,
                        item.status.as_str(),
                        item.total_bytes,
                        item.downloaded_bytes,
                        item.download_speed,
                        item.progress,
                        item.error,
                        item.metadata,
                        now,
                    ],
                )?;
                now
            }
        };

        Ok(DownloadItem {
            created,
            updated: now,
            ..item.clone()
        })
    }

    pub fn download_remove(&self, model_repo: &str, file_path: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM downloads WHERE modelRepo = ?1 AND filePath = ?2",
            params![model_repo, file_path],
        )?;
        Ok(deleted > 0)
    }

    pub fn download_clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM downloads", [])?;
        Ok(())
    }

    pub fn download_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM downloads", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Oldest `created ASC` row with status `queued`.
    pub fn download_get_next_queued(&self) -> Result<Option<DownloadItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM downloads WHERE status = 'queued' ORDER BY created ASC LIMIT 1",
                DOWNLOAD_COLUMNS
            ),
            [],
            Self::row_to_download_item,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Crash-reconciliation: `downloading`/`error`/`idle` rows reset to
    /// `queued` with counters zeroed; `cancelled`/`unknown` rows are
    /// deleted; `complete` rows are kept untouched.
    pub fn download_reset(&self) -> Result<()> {
        let conn = self.lock()?;
        let now = now_unix();
        conn.execute(
            r#"UPDATE downloads SET status = 'queued', totalBytes = 0, downloadedBytes = 0,
               downloadSpeed = '0 B/s', progress = 0, error = NULL, updated = ?1
               WHERE status IN ('downloading', 'error', 'idle')"#,
            params![now],
        )?;
        conn.execute(
            "DELETE FROM downloads WHERE status IN ('cancelled', 'unknown')",
            [],
        )?;
        Ok(())
    }

    fn row_to_download_item(row: &rusqlite::Row) -> rusqlite::Result<DownloadItem> {
        let status: String = row.get(2)?;
        Ok(DownloadItem {
            model_repo: row.get(0)?,
            file_path: row.get(1)?,
            status: DownloadItemStatus::parse(&status),
            total_bytes: row.get(3)?,
            downloaded_bytes: row.get(4)?,
            download_speed: row.get(5)?,
            progress: row.get(6)?,
            error: row.get(7)?,
            metadata: row.get(8)?,
            created: row.get(9)?,
            updated: row.get(10)?,
        })
    }
}

const DOWNLOAD_COLUMNS: &str = "modelRepo, filePath, status, totalBytes, downloadedBytes, \
    downloadSpeed, progress, error, metadata, created, updated";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_then_double_enqueue_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let first = store.download_enqueue("Demo/Foo-GGUF", "foo.Q4_0.gguf").unwrap();
        assert_eq!(first.status, DownloadItemStatus::Queued);

        let second = store.download_enqueue("Demo/Foo-GGUF", "foo.Q4_0.gguf").unwrap();
        assert_eq!(first.created, second.created);
        assert_eq!(store.download_count().unwrap(), 1);
    }

    #[test]
    fn test_get_next_queued_is_fifo() {
        let store = Store::open_in_memory().unwrap();
        store.download_enqueue("A/1", "a.gguf").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.download_enqueue("B/2", "b.gguf").unwrap();

        let next = store.download_get_next_queued().unwrap().unwrap();
        assert_eq!(next.model_repo, "A/1");
    }

    #[test]
    fn test_reset_reconciles_statuses() {
        let store = Store::open_in_memory().unwrap();
        let mut downloading = DownloadItem::new_queued("A/1", "a.gguf");
        downloading.status = DownloadItemStatus::Downloading;
        downloading.downloaded_bytes = 512;
        store.download_set(&downloading).unwrap();

        let mut cancelled = DownloadItem::new_queued("B/2", "b.gguf");
        cancelled.status = DownloadItemStatus::Cancelled;
        store.download_set(&cancelled).unwrap();

        let mut complete = DownloadItem::new_queued("C/3", "c.gguf");
        complete.status = DownloadItemStatus::Complete;
        store.download_set(&complete).unwrap();

        store.download_reset().unwrap();

        let a = store.download_get("A/1", "a.gguf").unwrap().unwrap();
        assert_eq!(a.status, DownloadItemStatus::Queued);
        assert_eq!(a.downloaded_bytes, 0);

        assert!(store.download_get("B/2", "b.gguf").unwrap().is_none());

        let c = store.download_get("C/3", "c.gguf").unwrap().unwrap();
        assert_eq!(c.status, DownloadItemStatus::Complete);
    }

    #[test]
    fn test_progress_monotonicity_across_sets() {
        let store = Store::open_in_memory().unwrap();
        let mut item = DownloadItem::new_queued("A/1", "a.gguf");
        item.status = DownloadItemStatus::Downloading;

        let mut last = 0i64;
        for bytes in [100, 400, 900, 1024] {
            item.downloaded_bytes = bytes;
            let saved = store.download_set(&item).unwrap();
            assert!(saved.downloaded_bytes >= last);
            last = saved.downloaded_bytes;
        }
    }
}
