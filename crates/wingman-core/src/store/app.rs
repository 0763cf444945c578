use super::{now_unix, Store};
use crate::error::Result;
use crate::model::AppItem;
use rusqlite::{params, OptionalExtension};

impl Store {
    /// Fetch the row for `(name, "default")`.
    pub fn app_get(&self, name: &str) -> Result<Option<AppItem>> {
        self.app_get_with_key(name, "default")
    }

    pub fn app_get_with_key(&self, name: &str, key: &str) -> Result<Option<AppItem>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT name, key, value, enabled, created, updated FROM app WHERE name = ?1 AND key = ?2",
            params![name, key],
            Self::row_to_app_item,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn app_get_all(&self) -> Result<Vec<AppItem>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT name, key, value, enabled, created, updated FROM app ORDER BY name, key")?;
        let rows = stmt
            .query_map([], Self::row_to_app_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert `(name, "default")` with the given value.
    pub fn app_set(&self, name: &str, value: &str) -> Result<AppItem> {
        self.app_set_with_key(name, "default", value)
    }

    pub fn app_set_with_key(&self, name: &str, key: &str, value: &str) -> Result<AppItem> {
        let conn = self.lock()?;
        let now = now_unix();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT created FROM app WHERE name = ?1 AND key = ?2",
                params![name, key],
                |row| row.get(0),
            )
            .optional()?;

        let created = match existing {
            Some(created) => {
                conn.execute(
                    "UPDATE app SET value = ?1, enabled = 1, updated = ?2 WHERE name = ?3 AND key = ?4",
                    params![value, now, name, key],
                )?;
                created
            }
            None => {
                conn.execute(
                    "INSERT INTO app (name, key, value, enabled, created, updated) VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                    params![name, key, value, now],
                )?;
                now
            }
        };

        Ok(AppItem {
            name: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            enabled: true,
            created,
            updated: now,
        })
    }

    pub fn app_remove(&self, name: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM app WHERE name = ?1 AND key = ?2", params![name, key])?;
        Ok(deleted > 0)
    }

    pub fn app_clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM app", [])?;
        Ok(())
    }

    pub fn app_count(&self) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM app", [], |row| row.get(0))
            .map_err(Into::into)
    }

    fn row_to_app_item(row: &rusqlite::Row) -> rusqlite::Result<AppItem> {
        Ok(AppItem {
            name: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
            enabled: row.get::<_, i64>(3)? != 0,
            created: row.get(4)?,
            updated: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_set_is_upsert() {
        let store = Store::open_in_memory().unwrap();
        let first = store.app_set("WingmanService", "{}").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = store.app_set("WingmanService", r#"{"status":"ready"}"#).unwrap();

        assert_eq!(first.created, second.created);
        assert!(second.updated >= first.updated);
        assert_eq!(store.app_count().unwrap(), 1);

        let fetched = store.app_get("WingmanService").unwrap().unwrap();
        assert_eq!(fetched.value, r#"{"status":"ready"}"#);
    }

    #[test]
    fn test_app_get_missing_returns_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.app_get("nope").unwrap().is_none());
    }

    #[test]
    fn test_app_remove() {
        let store = Store::open_in_memory().unwrap();
        store.app_set("x", "1").unwrap();
        assert!(store.app_remove("x", "default").unwrap());
        assert!(store.app_get("x").unwrap().is_none());
        assert!(!store.app_remove("x", "default").unwrap());
    }
}
