//! Cache storage trait plus SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A persisted record-set snapshot.
#[derive(Clone, Debug)]
pub struct CacheEntry {
  /// Serialized payload (a JSON array of records).
  pub payload: Vec<u8>,
  /// When the payload was written.
  pub stored_at: DateTime<Utc>,
}

/// Trait for durable cache backends.
///
/// Payloads are opaque to the store. Writes are last-writer-wins per key;
/// entries are never swept, only overwritten, deleted, or ignored as stale
/// by the reader.
pub trait CacheStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  fn set(&self, key: &str, payload: &[u8], stored_at: DateTime<Utc>) -> Result<()>;

  fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store used by tests and cache-disabled runs.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, payload: &[u8], stored_at: DateTime<Utc>) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(
      key.to_string(),
      CacheEntry {
        payload: payload.to_vec(),
        stored_at,
      },
    );
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }
}

/// SQLite-based cache storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the cache database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  /// Open or create the cache database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway cache that lives only as long as the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("newsdesk").join("cache.db"))
  }

  /// Run database migrations for the cache table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the snapshot cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS record_cache (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    stored_at TEXT NOT NULL
);
"#;

impl CacheStore for SqliteStore {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT payload, stored_at FROM record_cache WHERE cache_key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, String)> = stmt
      .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
      .ok();

    match row {
      Some((payload, stored_at_str)) => {
        let stored_at = parse_datetime(&stored_at_str)?;
        Ok(Some(CacheEntry { payload, stored_at }))
      }
      None => Ok(None),
    }
  }

  fn set(&self, key: &str, payload: &[u8], stored_at: DateTime<Utc>) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO record_cache (cache_key, payload, stored_at)
         VALUES (?, ?, ?)",
        params![key, payload, stored_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM record_cache WHERE cache_key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;

    Ok(())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn roundtrip(store: &dyn CacheStore) {
    let stored_at = Utc::now();
    store.set("k", b"[1,2,3]", stored_at).unwrap();

    let entry = store.get("k").unwrap().expect("entry should exist");
    assert_eq!(entry.payload, b"[1,2,3]");
    // RFC 3339 keeps sub-second precision, so the timestamp survives intact
    assert_eq!(
      entry.stored_at.timestamp_millis(),
      stored_at.timestamp_millis()
    );
  }

  #[test]
  fn memory_store_roundtrip() {
    roundtrip(&MemoryStore::new());
  }

  #[test]
  fn sqlite_store_roundtrip() {
    roundtrip(&SqliteStore::open_in_memory().unwrap());
  }

  #[test]
  fn set_overwrites_previous_entry() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set("k", b"old", Utc::now()).unwrap();
    store.set("k", b"new", Utc::now()).unwrap();

    let entry = store.get("k").unwrap().expect("entry should exist");
    assert_eq!(entry.payload, b"new");
  }

  #[test]
  fn delete_removes_only_the_named_key() {
    let store = MemoryStore::new();
    store.set("keep", b"a", Utc::now()).unwrap();
    store.set("drop", b"b", Utc::now()).unwrap();

    store.delete("drop").unwrap();

    assert!(store.get("drop").unwrap().is_none());
    assert!(store.get("keep").unwrap().is_some());
  }

  #[test]
  fn missing_key_is_none() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get("absent").unwrap().is_none());
  }
}
