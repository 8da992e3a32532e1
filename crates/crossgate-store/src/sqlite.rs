//! SQLite implementation of [`LogStore`].
//!
//! This is the durable relational half of the audit log. It uses rusqlite
//! with bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crossgate_core::{
    now_millis, Ed25519PublicKey, Ed25519Signature, LogEntry, LogKey, SessionId, Sha256Hash,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, LogStore};

const ENTRY_COLUMNS: &str =
    "log_key, session_id, log_type, operation, timestamp, data, hash, signer, signature";

/// SQLite-based log store.
///
/// Thread-safe via an internal Mutex. All operations run on the blocking
/// pool so they never stall the async runtime.
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn blob_column<const N: usize>(
    row: &rusqlite::Row<'_>,
    index: usize,
    name: &str,
) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(index)?;
    bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(index, name.into(), rusqlite::types::Type::Blob)
    })
}

// Columns in ENTRY_COLUMNS order.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        key: LogKey::from_raw(row.get::<_, String>(0)?),
        session_id: SessionId::new(row.get::<_, String>(1)?),
        log_type: row.get(2)?,
        operation: row.get(3)?,
        timestamp: row.get(4)?,
        data: row.get(5)?,
        hash: Sha256Hash(blob_column(row, 6, "hash")?),
        signer_public_key: Ed25519PublicKey(blob_column(row, 7, "signer")?),
        signature: Ed25519Signature(blob_column(row, 8, "signature")?),
    })
}

fn query_entries(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let entries = stmt
        .query_map(args, row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert_entry(&self, entry: &LogEntry) -> Result<InsertResult> {
        let entry = entry.clone();

        self.run(move |conn| {
            let existing: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT hash FROM log_entries WHERE log_key = ?1",
                    params![entry.key.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                let existing = Sha256Hash::try_from(existing.as_slice())
                    .map_err(|_| StoreError::InvalidData("stored hash is not 32 bytes".into()))?;
                return Ok(if existing == entry.hash {
                    InsertResult::AlreadyExists
                } else {
                    InsertResult::Conflict { existing }
                });
            }

            conn.execute(
                "INSERT INTO log_entries (
                    log_key, session_id, log_type, operation, timestamp, data,
                    hash, signer, signature, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.key.as_str(),
                    entry.session_id.as_str(),
                    entry.log_type,
                    entry.operation,
                    entry.timestamp,
                    entry.data,
                    entry.hash.0.as_slice(),
                    entry.signer_public_key.0.as_slice(),
                    entry.signature.0.as_slice(),
                    now_millis(),
                ],
            )?;

            tracing::debug!(key = %entry.key, "inserted log row");
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn get_entry(&self, key: &LogKey) -> Result<Option<LogEntry>> {
        let key = key.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM log_entries WHERE log_key = ?1", ENTRY_COLUMNS),
                params![key.as_str()],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_entry(&self, key: &LogKey) -> Result<bool> {
        let key = key.clone();

        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM log_entries WHERE log_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn get_latest_entry(&self, session_id: &SessionId) -> Result<Option<LogEntry>> {
        let session_id = session_id.clone();

        self.run(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM log_entries WHERE session_id = ?1
                     ORDER BY timestamp DESC, log_key DESC LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![session_id.as_str()],
                row_to_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_session_entries(&self, session_id: &SessionId) -> Result<Vec<LogEntry>> {
        let session_id = session_id.clone();

        self.run(move |conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {} FROM log_entries WHERE session_id = ?1
                     ORDER BY timestamp ASC, log_key ASC",
                    ENTRY_COLUMNS
                ),
                params![session_id.as_str()],
            )
        })
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT session_id FROM log_entries ORDER BY session_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0).map(SessionId::new))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn get_entries_since(&self, after: i64) -> Result<Vec<LogEntry>> {
        self.run(move |conn| {
            query_entries(
                conn,
                &format!(
                    "SELECT {} FROM log_entries WHERE timestamp > ?1
                     ORDER BY timestamp ASC, log_key ASC",
                    ENTRY_COLUMNS
                ),
                params![after],
            )
        })
        .await
    }

    async fn max_timestamp(&self) -> Result<Option<i64>> {
        self.run(|conn| {
            conn.query_row("SELECT MAX(timestamp) FROM log_entries", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgate_core::{Keypair, LogEntryDraft};

    fn make_entry(keypair: &Keypair, session: &str, op: &str, ts: i64) -> LogEntry {
        let draft = LogEntryDraft::new(SessionId::new(session), "exec", op, "{}");
        LogEntry::seal(draft, ts, keypair)
    }

    #[tokio::test]
    async fn test_insert_and_get_entry() {
        let store = SqliteLogStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let entry = make_entry(&keypair, "s-1", "lock", 100);

        let result = store.insert_entry(&entry).await.unwrap();
        assert_eq!(result, InsertResult::Inserted);

        let retrieved = store.get_entry(&entry.key).await.unwrap().unwrap();
        assert_eq!(retrieved, entry);
        retrieved.verify().unwrap();
        assert!(store.has_entry(&entry.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_idempotent_insert() {
        let store = SqliteLogStore::open_memory().unwrap();
        let entry = make_entry(&Keypair::generate(), "s-1", "lock", 100);

        assert_eq!(store.insert_entry(&entry).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert_entry(&entry).await.unwrap(), InsertResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_conflict_detection() {
        let store = SqliteLogStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let first = make_entry(&keypair, "s-1", "lock", 100);
        let second = make_entry(&keypair, "s-1", "lock", 200);
        assert_eq!(first.key, second.key);

        store.insert_entry(&first).await.unwrap();
        let result = store.insert_entry(&second).await.unwrap();
        assert_eq!(result, InsertResult::Conflict { existing: first.hash });

        // The original is untouched.
        assert_eq!(store.get_entry(&first.key).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn test_latest_and_since() {
        let store = SqliteLogStore::open_memory().unwrap();
        let keypair = Keypair::generate();
        let t1 = make_entry(&keypair, "s-1", "a", 10);
        let t2 = make_entry(&keypair, "s-2", "b", 20);
        let t3 = make_entry(&keypair, "s-1", "c", 30);

        // Insert out of order.
        for e in [&t3, &t1, &t2] {
            store.insert_entry(e).await.unwrap();
        }

        let latest = store.get_latest_entry(&SessionId::new("s-1")).await.unwrap().unwrap();
        assert_eq!(latest, t3);

        let since = store.get_entries_since(10).await.unwrap();
        assert_eq!(since, vec![t2.clone(), t3.clone()]);
        assert!(store.get_entries_since(30).await.unwrap().is_empty());

        let session = store.get_session_entries(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(session, vec![t1, t3]);

        assert_eq!(
            store.list_sessions().await.unwrap(),
            vec![SessionId::new("s-1"), SessionId::new("s-2")]
        );
        assert_eq!(store.max_timestamp().await.unwrap(), Some(30));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = SqliteLogStore::open_memory().unwrap();
        assert_eq!(store.max_timestamp().await.unwrap(), None);
        assert!(store.get_latest_entry(&SessionId::new("x")).await.unwrap().is_none());
        assert!(store.get_entries_since(i64::MIN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.db");
        let entry = make_entry(&Keypair::generate(), "s-1", "lock", 100);

        {
            let store = SqliteLogStore::open(&path).unwrap();
            store.insert_entry(&entry).await.unwrap();
        }

        let store = SqliteLogStore::open(&path).unwrap();
        assert_eq!(store.get_entry(&entry.key).await.unwrap(), Some(entry));
    }
}
