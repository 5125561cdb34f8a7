use backlog_core::{Item, ItemStore, MarkOutcome, StoreError, UpsertOutcome};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

pub const BACKLOG_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp out of range: {0}")]
    Timestamp(i64),
    #[error("invalid external id: {0:?}")]
    InvalidId(String),
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidId(id) => StoreError::InvalidId(id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// SQLite-backed item table. The connection sits behind a mutex so a single
/// store can be shared between the scheduler and the live event listener.
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > BACKLOG_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: BACKLOG_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.lock()?;
            let sql = include_str!("../migrations/0001_items.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn upsert_item(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        self.write_active(external_id, added_at, true)
    }

    /// Like `upsert_item`, but an item that is already active keeps its
    /// stored `added_at`.
    pub fn ensure_item(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        self.write_active(external_id, added_at, false)
    }

    fn write_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
        rewrite_active: bool,
    ) -> Result<UpsertOutcome, StorageError> {
        let external_id = checked_id(external_id)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous: Option<Option<i64>> = tx
            .query_row(
                "SELECT removed_at_ms FROM items WHERE external_id = ?1",
                [external_id],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match previous {
            None => UpsertOutcome::Created,
            Some(Some(_)) => UpsertOutcome::Reactivated,
            Some(None) => UpsertOutcome::Refreshed,
        };
        if rewrite_active || outcome.opened() {
            tx.execute(
                "
                INSERT INTO items (external_id, added_at_ms, removed_at_ms)
                VALUES (?1, ?2, NULL)
                ON CONFLICT(external_id) DO UPDATE SET
                    added_at_ms=excluded.added_at_ms,
                    removed_at_ms=NULL
                ",
                params![external_id, added_at.timestamp_millis()],
            )?;
        }
        tx.commit()?;

        Ok(outcome)
    }

    pub fn close_item(
        &self,
        external_id: &str,
        removed_at: DateTime<Utc>,
    ) -> Result<MarkOutcome, StorageError> {
        let external_id = checked_id(external_id)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current: Option<(i64, Option<i64>)> = tx
            .query_row(
                "SELECT added_at_ms, removed_at_ms FROM items WHERE external_id = ?1",
                [external_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match current {
            None => MarkOutcome::NotFound,
            Some((_, Some(_))) => MarkOutcome::AlreadyClosed,
            Some((added_at_ms, None)) => {
                let removed_at_ms = removed_at.timestamp_millis().max(added_at_ms);
                tx.execute(
                    "
                    UPDATE items SET removed_at_ms = ?2
                    WHERE external_id = ?1 AND removed_at_ms IS NULL
                    ",
                    params![external_id, removed_at_ms],
                )?;
                MarkOutcome::Closed
            }
        };
        tx.commit()?;

        Ok(outcome)
    }

    pub fn item(&self, external_id: &str) -> Result<Option<Item>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "
                SELECT external_id, added_at_ms, removed_at_ms
                FROM items
                WHERE external_id = ?1
                ",
                [external_id.trim()],
                raw_item,
            )
            .optional()?;
        row.map(RawItem::into_item).transpose()
    }

    pub fn active_items(&self) -> Result<Vec<Item>, StorageError> {
        self.query_items(
            "
            SELECT external_id, added_at_ms, removed_at_ms
            FROM items
            WHERE removed_at_ms IS NULL
            ORDER BY added_at_ms DESC, external_id ASC
            ",
            None,
        )
    }

    pub fn active_count(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE removed_at_ms IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn recently_closed_items(&self, limit: usize) -> Result<Vec<Item>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.query_items(
            "
            SELECT external_id, added_at_ms, removed_at_ms
            FROM items
            WHERE removed_at_ms IS NOT NULL
            ORDER BY added_at_ms DESC, external_id ASC
            LIMIT ?1
            ",
            Some(i64::try_from(limit).unwrap_or(i64::MAX)),
        )
    }

    pub fn item_count(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            )
            ",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn query_items(&self, sql: &str, limit: Option<i64>) -> Result<Vec<Item>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match limit {
            Some(limit) => stmt
                .query_map([limit], raw_item)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], raw_item)?.collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(RawItem::into_item).collect()
    }
}

impl ItemStore for SqliteItemStore {
    fn upsert_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(self.upsert_item(external_id, added_at)?)
    }

    fn ensure_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(self.ensure_item(external_id, added_at)?)
    }

    fn mark_removed(
        &self,
        external_id: &str,
        removed_at: DateTime<Utc>,
    ) -> Result<MarkOutcome, StoreError> {
        Ok(self.close_item(external_id, removed_at)?)
    }

    fn get(&self, external_id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.item(external_id)?)
    }

    fn list_active(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.active_items()?)
    }

    fn count_active(&self) -> Result<usize, StoreError> {
        Ok(self.active_count()?)
    }

    fn list_recently_closed(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        Ok(self.recently_closed_items(limit)?)
    }
}

struct RawItem {
    external_id: String,
    added_at_ms: i64,
    removed_at_ms: Option<i64>,
}

impl RawItem {
    fn into_item(self) -> Result<Item, StorageError> {
        Ok(Item {
            external_id: self.external_id,
            added_at: timestamp_from_ms(self.added_at_ms)?,
            removed_at: self.removed_at_ms.map(timestamp_from_ms).transpose()?,
        })
    }
}

fn raw_item(row: &Row<'_>) -> rusqlite::Result<RawItem> {
    Ok(RawItem {
        external_id: row.get(0)?,
        added_at_ms: row.get(1)?,
        removed_at_ms: row.get(2)?,
    })
}

fn checked_id(external_id: &str) -> Result<&str, StorageError> {
    let trimmed = external_id.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidId(external_id.to_string()));
    }
    Ok(trimmed)
}

fn timestamp_from_ms(value: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or(StorageError::Timestamp(value))
}
