use std::path::Path;

use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::payload::{Payload, PayloadKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("assets table needs migration: missing column '{0}'")]
    NeedsMigration(&'static str),
    #[error("corrupt payload for key '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable key-value store for bundle files, backed by SQLite. Every payload
/// row carries its kind tag so readers never have to guess the shape.
///
/// Each operation borrows the connection for exactly one call; a `put` is a
/// single `INSERT OR REPLACE`, so writes are atomic per key and last write
/// wins.
#[derive(Debug)]
pub struct BlobStore {
    conn: Connection,
}

impl BlobStore {
    /// Opens (or creates) the store at `path`. Idempotent: the schema is
    /// created when absent. An existing `assets` table without the `kind`
    /// column is from an older layout and is rejected rather than silently
    /// degraded.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.setup_schema().await?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.setup_schema().await?;
        Ok(store)
    }

    async fn setup_schema(&self) -> Result<(), StoreError> {
        let columns = self
            .conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS assets (
                        key     TEXT PRIMARY KEY,
                        kind    TEXT NOT NULL,
                        body    BLOB NOT NULL
                    )",
                    [],
                )?;
                let mut stmt = conn.prepare("PRAGMA table_info(assets)")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(names)
            })
            .await?;

        for required in ["key", "kind", "body"] {
            if !columns.iter().any(|c| c == required) {
                return Err(StoreError::NeedsMigration(required));
            }
        }
        Ok(())
    }

    /// Stores `payload` under `key`, replacing any previous value.
    pub async fn put(&self, key: &str, payload: &Payload) -> Result<(), StoreError> {
        let key = key.to_string();
        let kind = payload.kind().as_str();
        let body = payload.as_bytes().to_vec();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO assets (key, kind, body) VALUES (?1, ?2, ?3)",
                    params![key, kind, body],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Payload>, StoreError> {
        let owned_key = key.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT kind, body FROM assets WHERE key = ?1",
                        params![owned_key],
                        |row| {
                            let kind: String = row.get(0)?;
                            let body: Vec<u8> = row.get(1)?;
                            Ok((kind, body))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        match row {
            None => Ok(None),
            Some((kind, body)) => {
                let kind = PayloadKind::from_str(&kind).ok_or_else(|| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: format!("unknown kind tag '{kind}'"),
                })?;
                match kind {
                    PayloadKind::Binary => Ok(Some(Payload::Binary(body))),
                    PayloadKind::Text => {
                        let text =
                            String::from_utf8(body).map_err(|e| StoreError::Corrupt {
                                key: key.to_string(),
                                reason: e.to_string(),
                            })?;
                        Ok(Some(Payload::Text(text)))
                    }
                }
            }
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM assets WHERE key = ?1",
                        params![key],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(found)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM assets WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let keys = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key FROM assets ORDER BY key")?;
                let keys = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    /// Removes every cached asset. Used when a re-download from scratch is
    /// requested.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM assets", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
