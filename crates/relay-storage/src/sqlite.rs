//! SQLite content store

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::{validate, Clock, ContentKind, ContentRecord, ContentStore, StorageError};

/// SQLite content store
///
/// Embedded persistence suitable for single-node deployments.
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
    clock: Clock,
}

fn db_err(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

impl SqliteContentStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path).map_err(db_err)?)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
            clock: Clock::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS content (
                    owner TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    key TEXT NOT NULL,
                    body TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (owner, kind, key)
                );

                CREATE INDEX IF NOT EXISTS idx_content_owner_updated
                    ON content(owner, kind, updated_at);
                "#,
            )
            .map_err(db_err)
    }

    fn select(
        conn: &Connection,
        owner: &str,
        kind: ContentKind,
        key: &str,
    ) -> Result<Option<ContentRecord>, StorageError> {
        let row = conn
            .query_row(
                "SELECT owner, kind, key, body, created_at, updated_at
                 FROM content WHERE owner = ?1 AND kind = ?2 AND key = ?3",
                params![owner, kind.as_str(), key],
                read_row,
            )
            .optional()
            .map_err(db_err)?;

        row.map(into_record).transpose()
    }
}

type RawRecord = (String, String, String, String, i64, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_record(raw: RawRecord) -> Result<ContentRecord, StorageError> {
    let (owner, kind, key, body, created_at, updated_at) = raw;
    Ok(ContentRecord {
        owner,
        kind: kind.parse()?,
        key,
        body,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn upsert(
        &self,
        owner: &str,
        kind: ContentKind,
        key: &str,
        body: &str,
    ) -> Result<ContentRecord, StorageError> {
        validate(owner, key)?;
        let now = self.clock.now();
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO content (owner, kind, key, body, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(owner, kind, key) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![owner, kind.as_str(), key, body, now],
        )
        .map_err(db_err)?;

        debug!(owner = %owner, kind = %kind, key = %key, "Stored content");
        Self::select(&conn, owner, kind, key)?
            .ok_or_else(|| StorageError::Database(format!("{} {} vanished after write", kind, key)))
    }

    async fn get(
        &self,
        owner: &str,
        kind: ContentKind,
        key: &str,
    ) -> Result<ContentRecord, StorageError> {
        let conn = self.conn.lock();
        Self::select(&conn, owner, kind, key)?
            .ok_or_else(|| StorageError::NotFound(format!("{} {}", kind, key)))
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        kind: ContentKind,
    ) -> Result<Vec<ContentRecord>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT owner, kind, key, body, created_at, updated_at
                 FROM content WHERE owner = ?1 AND kind = ?2
                 ORDER BY updated_at DESC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![owner, kind.as_str()], read_row)
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(into_record(row.map_err(db_err)?)?);
        }
        Ok(records)
    }

    async fn delete(&self, owner: &str, kind: ContentKind, key: &str) -> Result<(), StorageError> {
        let affected = self
            .conn
            .lock()
            .execute(
                "DELETE FROM content WHERE owner = ?1 AND kind = ?2 AND key = ?3",
                params![owner, kind.as_str(), key],
            )
            .map_err(db_err)?;

        if affected == 0 {
            return Err(StorageError::NotFound(format!("{} {}", kind, key)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_crud() {
        let store = SqliteContentStore::in_memory().unwrap();

        let created = store
            .upsert("alice", ContentKind::Document, "doc-1", "<p>one</p>")
            .await
            .unwrap();
        assert_eq!(created.created_at, created.updated_at);

        let loaded = store.get("alice", ContentKind::Document, "doc-1").await.unwrap();
        assert_eq!(loaded, created);

        store.delete("alice", ContentKind::Document, "doc-1").await.unwrap();
        assert!(matches!(
            store.get("alice", ContentKind::Document, "doc-1").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("alice", ContentKind::Document, "doc-1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_upsert_keeps_created_at() {
        let store = SqliteContentStore::in_memory().unwrap();

        let first = store
            .upsert("alice", ContentKind::Drawing, "board", "[]")
            .await
            .unwrap();
        let second = store
            .upsert("alice", ContentKind::Drawing, "board", "[1]")
            .await
            .unwrap();

        assert_eq!(second.body, "[1]");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(
            store.list_by_owner("alice", ContentKind::Drawing).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_sqlite_list_by_owner() {
        let store = SqliteContentStore::in_memory().unwrap();
        for key in ["one", "two", "three"] {
            store
                .upsert("alice", ContentKind::Document, key, "x")
                .await
                .unwrap();
        }
        store
            .upsert("bob", ContentKind::Document, "four", "x")
            .await
            .unwrap();

        let keys: Vec<_> = store
            .list_by_owner("alice", ContentKind::Document)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["three", "two", "one"]);

        assert!(store.get("bob", ContentKind::Document, "one").await.is_err());
    }
}
