//! Store traits: the abstract interfaces behind the audit log.
//!
//! The audit log writes every entry twice: into a [`LogStore`] (relational,
//! keyed by log key, the fast path for queries) and into a [`ContentStore`]
//! (addressed by content hash, the tamper-evident path anyone can cross-check).

use std::sync::Arc;

use async_trait::async_trait;
use crossgate_core::{LogEntry, LogKey, SessionId, Sha256Hash};

use crate::error::Result;

/// Result of inserting a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry was inserted.
    Inserted,
    /// The same entry is already stored (idempotent, not an error).
    AlreadyExists,
    /// A different entry is stored under the same key.
    Conflict {
        /// Hash of the entry already stored.
        existing: Sha256Hash,
    },
}

/// Relational log storage.
///
/// Ordering is always ascending by `(timestamp, key)`, so queries are
/// deterministic even if two entries share a timestamp.
#[async_trait]
pub trait LogStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an entry keyed by its log key.
    ///
    /// # Returns
    /// - `Inserted` if the key was new.
    /// - `AlreadyExists` if an entry with the same key and hash exists.
    /// - `Conflict` if a different entry exists under the key.
    async fn insert_entry(&self, entry: &LogEntry) -> Result<InsertResult>;

    /// Point lookup.
    async fn get_entry(&self, key: &LogKey) -> Result<Option<LogEntry>>;

    async fn has_entry(&self, key: &LogKey) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Session Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The entry with the greatest timestamp for a session.
    async fn get_latest_entry(&self, session_id: &SessionId) -> Result<Option<LogEntry>>;

    /// All entries of a session, ascending.
    async fn get_session_entries(&self, session_id: &SessionId) -> Result<Vec<LogEntry>>;

    /// Every session that has at least one entry, sorted.
    async fn list_sessions(&self) -> Result<Vec<SessionId>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Range Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Entries of all sessions with `timestamp > after`, ascending.
    async fn get_entries_since(&self, after: i64) -> Result<Vec<LogEntry>>;

    /// Greatest timestamp in the store.
    async fn max_timestamp(&self) -> Result<Option<i64>>;
}

/// Content-addressed blob storage. The content ID is `SHA-256(bytes)`.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their content ID. Storing the same bytes twice
    /// is a no-op.
    async fn put(&self, bytes: &[u8]) -> Result<Sha256Hash>;

    /// Fetch bytes by content ID.
    ///
    /// Implementations must fail with `Corrupted` rather than return bytes
    /// that do not hash to `id`.
    async fn get(&self, id: &Sha256Hash) -> Result<Option<Vec<u8>>>;

    async fn contains(&self, id: &Sha256Hash) -> Result<bool>;
}

#[async_trait]
impl<S: LogStore + ?Sized> LogStore for Arc<S> {
    async fn insert_entry(&self, entry: &LogEntry) -> Result<InsertResult> {
        (**self).insert_entry(entry).await
    }

    async fn get_entry(&self, key: &LogKey) -> Result<Option<LogEntry>> {
        (**self).get_entry(key).await
    }

    async fn has_entry(&self, key: &LogKey) -> Result<bool> {
        (**self).has_entry(key).await
    }

    async fn get_latest_entry(&self, session_id: &SessionId) -> Result<Option<LogEntry>> {
        (**self).get_latest_entry(session_id).await
    }

    async fn get_session_entries(&self, session_id: &SessionId) -> Result<Vec<LogEntry>> {
        (**self).get_session_entries(session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        (**self).list_sessions().await
    }

    async fn get_entries_since(&self, after: i64) -> Result<Vec<LogEntry>> {
        (**self).get_entries_since(after).await
    }

    async fn max_timestamp(&self) -> Result<Option<i64>> {
        (**self).max_timestamp().await
    }
}

#[async_trait]
impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    async fn put(&self, bytes: &[u8]) -> Result<Sha256Hash> {
        (**self).put(bytes).await
    }

    async fn get(&self, id: &Sha256Hash) -> Result<Option<Vec<u8>>> {
        (**self).get(id).await
    }

    async fn contains(&self, id: &Sha256Hash) -> Result<bool> {
        (**self).contains(id).await
    }
}
