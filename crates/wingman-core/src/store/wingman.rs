use super::{now_unix, Store};
use crate::error::Result;
use crate::model::{WingmanItem, WingmanItemStatus};
use rusqlite::{params, OptionalExtension};

impl Store {
    pub fn wingman_get(&self, alias: &str) -> Result<Option<WingmanItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM wingman WHERE alias = ?1", WINGMAN_COLUMNS),
            params![alias],
            Self::row_to_wingman_item,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn wingman_get_all(&self) -> Result<Vec<WingmanItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wingman ORDER BY created ASC",
            WINGMAN_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Self::row_to_wingman_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn wingman_get_all_by_status(&self, status: WingmanItemStatus) -> Result<Vec<WingmanItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wingman WHERE status = ?1 ORDER BY created ASC",
            WINGMAN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], Self::row_to_wingman_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Any row with an active status (`queued`, `preparing`, `inferring`).
    /// Should hold ≤ 1 entry during steady-state operation.
    pub fn wingman_get_all_active(&self) -> Result<Vec<WingmanItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wingman WHERE status IN ('queued', 'preparing', 'inferring') ORDER BY created ASC",
            WINGMAN_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Self::row_to_wingman_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn wingman_get_next_queued(&self) -> Result<Option<WingmanItem>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM wingman WHERE status = 'queued' ORDER BY created ASC LIMIT 1",
                WINGMAN_COLUMNS
            ),
            [],
            Self::row_to_wingman_item,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Rows bound to `port` that are not yet `complete`.
    pub fn wingman_get_by_port(&self, port: u16) -> Result<Vec<WingmanItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wingman WHERE port = ?1 AND status != 'complete' ORDER BY created ASC",
            WINGMAN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![port], Self::row_to_wingman_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert by `alias`. `updated` is always set to "now".
    pub fn wingman_set(&self, item: &WingmanItem) -> Result<WingmanItem> {
        let conn = self.lock()?;
        let now = now_unix();

        let existing_created: Option<i64> = conn
            .query_row(
                "SELECT created FROM wingman WHERE alias = ?1",
                params![item.alias],
                |row| row.get(0),
            )
            .optional()?;

        let created = match existing_created {
            Some(created) => {
                conn.execute(
                    r#"UPDATE wingman SET status = ?1, modelRepo = ?2, filePath = ?3, address = ?4,
                       port = ?5, contextSize = ?6, gpuLayers = ?7, force = ?8, error = ?9, updated = ?10
                       WHERE alias = ?11"#,
                    params![
                        item.status.as_str(),
                        item.model_repo,
                        item.file_path,
                        item.address,
                        item.port,
                        item.context_size,
                        item.gpu_layers,
                        item.force,
                        item.error,
                        now,
                        item.alias,
                    ],
                )?;
                created
            }
            None => {
                conn.execute(
                    r#"INSERT INTO wingman
                       (alias, status, modelRepo, filePath, address, port, contextSize, gpuLayers,
                        force, error, created, updated)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)"#,
                    params![
                        item.alias,
                        item.status.as_str(),
                        item.model_repo,
                        item.file_path,
                        item.address,
                        item.port,
                        item.context_size,
                        item.gpu_layers,
                        item.force,
                        item.error,
                        now,
                    ],
                )?;
                now
            }
        };

        Ok(WingmanItem {
            created,
            updated: now,
            ..item.clone()
        })
    }

    pub fn wingman_remove(&self, alias: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM wingman WHERE alias = ?1", params![alias])?;
        Ok(deleted > 0)
    }

    pub fn wingman_clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM wingman", [])?;
        Ok(())
    }

    pub fn wingman_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM wingman", [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Crash-reconciliation: keep the most recently `updated` active row
    /// (re-marked `queued`), delete all other active rows, and delete every
    /// `complete` row. `error` rows are preserved.
    pub fn wingman_reset(&self) -> Result<()> {
        let active = self.wingman_get_all_active()?;
        if let Some(first) = active.first() {
            let mut keep = first.clone();
            for candidate in &active[1..] {
                if candidate.updated > keep.updated {
                    keep = candidate.clone();
                }
            }
            keep.status = WingmanItemStatus::Queued;
            self.wingman_set(&keep)?;

            let conn = self.lock()?;
            for row in &active {
                if row.alias != keep.alias {
                    conn.execute("DELETE FROM wingman WHERE alias = ?1", params![row.alias])?;
                }
            }
        }

        let conn = self.lock()?;
        conn.execute("DELETE FROM wingman WHERE status = 'complete'", [])?;
        Ok(())
    }

    fn row_to_wingman_item(row: &rusqlite::Row) -> rusqlite::Result<WingmanItem> {
        let status: String = row.get(1)?;
        Ok(WingmanItem {
            alias: row.get(0)?,
            status: WingmanItemStatus::parse(&status),
            model_repo: row.get(2)?,
            file_path: row.get(3)?,
            address: row.get(4)?,
            port: row.get(5)?,
            context_size: row.get(6)?,
            gpu_layers: row.get(7)?,
            force: row.get::<_, i64>(8)? != 0,
            error: row.get(9)?,
            created: row.get(10)?,
            updated: row.get(11)?,
        })
    }
}

const WINGMAN_COLUMNS: &str = "alias, status, modelRepo, filePath, address, port, contextSize, \
    gpuLayers, force, error, created, updated";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_active_enforced_by_reset() {
        let store = Store::open_in_memory().unwrap();
        let mut a = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        a.status = WingmanItemStatus::Inferring;
        store.wingman_set(&a).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(1100));

        let mut b = WingmanItem::new_queued("B", "R/2", "b.gguf", "localhost", 6567, 0, -1);
        b.status = WingmanItemStatus::Preparing;
        store.wingman_set(&b).unwrap();

        assert_eq!(store.wingman_get_all_active().unwrap().len(), 2);

        store.wingman_reset().unwrap();

        let active = store.wingman_get_all_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alias, "B");
        assert_eq!(active[0].status, WingmanItemStatus::Queued);
    }

    #[test]
    fn test_reset_drops_complete_keeps_error() {
        let store = Store::open_in_memory().unwrap();
        let mut complete = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        complete.status = WingmanItemStatus::Complete;
        store.wingman_set(&complete).unwrap();

        let mut errored = WingmanItem::new_queued("B", "R/2", "b.gguf", "localhost", 6567, 0, -1);
        errored.status = WingmanItemStatus::Error;
        errored.error = Some("boom".to_string());
        store.wingman_set(&errored).unwrap();

        store.wingman_reset().unwrap();

        assert!(store.wingman_get("A").unwrap().is_none());
        assert!(store.wingman_get("B").unwrap().is_some());
    }

    #[test]
    fn test_get_by_port_excludes_complete() {
        let store = Store::open_in_memory().unwrap();
        let mut a = WingmanItem::new_queued("A", "R/1", "a.gguf", "localhost", 6567, 0, -1);
        a.status = WingmanItemStatus::Complete;
        store.wingman_set(&a).unwrap();

        let b = WingmanItem::new_queued("B", "R/2", "b.gguf", "localhost", 6567, 0, -1);
        store.wingman_set(&b).unwrap();

        let rows = store.wingman_get_by_port(6567).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].alias, "B");
    }
}
