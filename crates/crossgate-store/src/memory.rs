//! In-memory implementations of the store traits.
//!
//! Same semantics as the SQLite and filesystem stores, with nothing
//! persisted. Both stores can be switched offline to exercise the failure
//! paths of the audit log's dual write.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crossgate_core::{LogEntry, LogKey, SessionId, Sha256Hash};

use crate::error::{Result, StoreError};
use crate::traits::{ContentStore, InsertResult, LogStore};

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

/// In-memory log store.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<HashMap<LogKey, LogEntry>>,
    offline: AtomicBool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<LogKey, LogEntry>>> {
        self.check_online()?;
        self.entries.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<LogKey, LogEntry>>> {
        self.check_online()?;
        self.entries.write().map_err(poisoned)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("log store offline".into()));
        }
        Ok(())
    }

    fn sorted<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> Vec<LogEntry> {
        let mut out: Vec<LogEntry> = entries.cloned().collect();
        out.sort_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)));
        out
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert_entry(&self, entry: &LogEntry) -> Result<InsertResult> {
        let mut entries = self.write()?;

        if let Some(existing) = entries.get(&entry.key) {
            return Ok(if existing.hash == entry.hash {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Conflict {
                    existing: existing.hash,
                }
            });
        }

        entries.insert(entry.key.clone(), entry.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_entry(&self, key: &LogKey) -> Result<Option<LogEntry>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn has_entry(&self, key: &LogKey) -> Result<bool> {
        Ok(self.read()?.contains_key(key))
    }

    async fn get_latest_entry(&self, session_id: &SessionId) -> Result<Option<LogEntry>> {
        let entries = self.read()?;
        Ok(entries
            .values()
            .filter(|e| &e.session_id == session_id)
            .max_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)))
            .cloned())
    }

    async fn get_session_entries(&self, session_id: &SessionId) -> Result<Vec<LogEntry>> {
        let entries = self.read()?;
        Ok(Self::sorted(
            entries.values().filter(|e| &e.session_id == session_id),
        ))
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let entries = self.read()?;
        let ids: BTreeSet<SessionId> = entries.values().map(|e| e.session_id.clone()).collect();
        Ok(ids.into_iter().collect())
    }

    async fn get_entries_since(&self, after: i64) -> Result<Vec<LogEntry>> {
        let entries = self.read()?;
        Ok(Self::sorted(entries.values().filter(|e| e.timestamp > after)))
    }

    async fn max_timestamp(&self) -> Result<Option<i64>> {
        Ok(self.read()?.values().map(|e| e.timestamp).max())
    }
}

/// In-memory content-addressed store.
#[derive(Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<Sha256Hash, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store bytes under an arbitrary ID without hashing them, the way a
    /// compromised or corrupted backend would.
    pub fn insert_raw(&self, id: Sha256Hash, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(id, bytes);
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("content store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: &[u8]) -> Result<Sha256Hash> {
        self.check_online()?;
        let id = Sha256Hash::hash(bytes);
        self.blobs
            .write()
            .map_err(poisoned)?
            .entry(id)
            .or_insert_with(|| bytes.to_vec());
        Ok(id)
    }

    async fn get(&self, id: &Sha256Hash) -> Result<Option<Vec<u8>>> {
        self.check_online()?;
        let blobs = self.blobs.read().map_err(poisoned)?;
        match blobs.get(id) {
            None => Ok(None),
            Some(bytes) => {
                let actual = Sha256Hash::hash(bytes);
                if actual != *id {
                    return Err(StoreError::Corrupted {
                        id: id.to_hex(),
                        actual: actual.to_hex(),
                    });
                }
                Ok(Some(bytes.clone()))
            }
        }
    }

    async fn contains(&self, id: &Sha256Hash) -> Result<bool> {
        self.check_online()?;
        Ok(self.blobs.read().map_err(poisoned)?.contains_key(id))
    }
}
