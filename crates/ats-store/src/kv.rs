use chrono::Utc;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Fixed key names of the persisted client state.
pub mod keys {
    pub const LLM_CONFIG: &str = "llm-config";
    pub const SESSION: &str = "resume-ats-session";
    pub const DEVICE_ID: &str = "device-id";
}

/// Process-wide string key → JSON value store.
///
/// Writers in other processes are not coordinated: last writer wins.
#[derive(Clone)]
pub struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| upsert(conn, key, value))
    }

    #[instrument(skip(self, value))]
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put_raw(key, &encode(key, value)?)
    }

    /// Write several encoded entries atomically: all land or none do.
    #[instrument(skip_all, fields(keys = entries.len()))]
    pub fn put_all(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            for (key, value) in entries {
                upsert(tx, key, value)?;
            }
            Ok(())
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_raw(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Serialization {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Remove several keys atomically. Returns how many were present.
    #[instrument(skip(self))]
    pub fn remove_all(&self, keys: &[&str]) -> Result<usize, StoreError> {
        self.db.with_tx(|tx| {
            let mut removed = 0;
            for key in keys {
                removed += tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
            }
            Ok(removed)
        })
    }

    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get_raw(key)?.is_some())
    }
}

/// JSON text for `value`, with the key named on failure.
pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn upsert(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
