//! String-keyed persistent storage.
//!
//! Every piece of durable state in courier (named user id, change token,
//! queued tag edits, device tags, channel id) lives behind the
//! [`KeyValueStore`] trait. Two implementations are provided:
//!
//! - [`MemoryStore`]: a `HashMap` behind a mutex, for tests and ephemeral hosts.
//! - [`RedbStore`]: a single redb table, durable across restarts.
//!
//! # Table design
//!
//! `RedbStore` uses one `KV` table keyed by the UTF-8 key with the UTF-8
//! value stored verbatim. Structured values are JSON-encoded by callers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{CourierError, Result};

/// Durable get/put storage. Writes are visible to the same process as soon
/// as the call returns.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply every entry in one atomic write. `None` removes the key.
    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<()>;

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.write_batch(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.write_batch(&[(key, None)])
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CourierError::Store("memory store poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn write_batch(&self, batch: &[(&str, Option<&str>)]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CourierError::Store("memory store poisoned".into()))?;
        for (key, value) in batch {
            match value {
                Some(v) => entries.insert((*key).to_string(), (*v).to_string()),
                None => entries.remove(*key),
            };
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

const KV: TableDefinition<&str, &str> = TableDefinition::new("kv");

fn store_err(e: impl std::fmt::Display) -> CourierError {
    CourierError::Store(e.to_string())
}

/// Persistent store backed by a single redb table.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the redb database at `path`.
    ///
    /// Creates the `KV` table if it doesn't already exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(KV).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(KV).map_err(store_err)?;
        let value = table.get(key).map_err(store_err)?;
        Ok(value.map(|v| v.value().to_string()))
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(KV).map_err(store_err)?;
            for (key, value) in entries {
                match value {
                    Some(v) => {
                        table.insert(*key, *v).map_err(store_err)?;
                    }
                    None => {
                        table.remove(*key).map_err(store_err)?;
                    }
                }
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Test store that remembers which threads touched it.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ThreadTrackingStore {
    inner: MemoryStore,
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

#[cfg(test)]
impl ThreadTrackingStore {
    fn touch(&self) {
        self.threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
    }

    /// Whether any access happened on `thread`.
    pub(crate) fn touched_on(&self, thread: std::thread::ThreadId) -> bool {
        self.threads.lock().unwrap().contains(&thread)
    }

    pub(crate) fn reset(&self) {
        self.threads.lock().unwrap().clear();
    }

    pub(crate) fn accesses(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

#[cfg(test)]
impl KeyValueStore for ThreadTrackingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.touch();
        self.inner.get(key)
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        self.touch();
        self.inner.write_batch(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn memory_store_put_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn redb_store_batch_applies_puts_and_removes() {
        let (_dir, store) = open_tmp();
        store.put("gone", "soon").unwrap();
        store
            .write_batch(&[("a", Some("1")), ("b", Some("2")), ("gone", None)])
            .unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("gone").unwrap(), None);
    }

    #[test]
    fn redb_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/store.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.put("named_user.id", "alice").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(
            store.get("named_user.id").unwrap().as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn redb_store_remove_missing_key_is_ok() {
        let (_dir, store) = open_tmp();
        store.remove("never-written").unwrap();
        assert_eq!(store.get("never-written").unwrap(), None);
    }
}
