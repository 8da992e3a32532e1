//! The audit log: durable, tamper-evident record of protocol steps.
//!
//! Every entry is written twice, first to the content-addressed store (which
//! must return the entry's own hash as its content ID) and then to the
//! relational store. A call succeeds only if both writes do. A failure in
//! between leaves at most an orphaned blob, which nothing reads without the
//! relational row pointing at it. Retrying the whole call is always safe.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossgate_core::{
    decode_content, now_millis, LogContent, LogEntry, LogEntryDraft, LogKey, SessionId,
};
use crossgate_store::{ContentStore, InsertResult, LogStore};

use crate::error::{GatewayError, Result};
use crate::signature::SignatureService;

pub struct AuditLog<L: LogStore, C: ContentStore> {
    log: L,
    content: C,
    signer: Arc<SignatureService>,
    /// Last timestamp handed out or observed.
    clock: AtomicI64,
}

impl<L: LogStore, C: ContentStore> AuditLog<L, C> {
    /// Open the log over its two stores.
    ///
    /// The clock resumes after the newest stored entry, so timestamps stay
    /// strictly increasing across restarts.
    pub async fn open(log: L, content: C, signer: Arc<SignatureService>) -> Result<Self> {
        let last = log.max_timestamp().await?.unwrap_or(0);
        Ok(Self {
            log,
            content,
            signer,
            clock: AtomicI64::new(last),
        })
    }

    pub fn log_store(&self) -> &L {
        &self.log
    }

    pub fn content_store(&self) -> &C {
        &self.content
    }

    /// Next local timestamp: `max(now, last + 1)`.
    fn next_timestamp(&self) -> i64 {
        let now = now_millis();
        let previous = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        now.max(previous.saturating_add(1))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Timestamp, hash, sign and dual-write a protocol step.
    ///
    /// Writes are idempotent on the key: storing the same data again returns
    /// the existing entry. Different data under an existing key is a
    /// `Conflict` and nothing is overwritten.
    pub async fn store(&self, draft: LogEntryDraft) -> Result<LogEntry> {
        let key = draft.key();
        if let Some(existing) = self.log.get_entry(&key).await? {
            if existing.data != draft.data {
                tracing::warn!(key = %key, "step already logged with different data");
                return Err(GatewayError::Conflict {
                    key,
                    existing: existing.hash,
                });
            }
            tracing::debug!(key = %key, "step already logged");
            return Ok(existing);
        }

        let entry = self.signer.seal(draft, self.next_timestamp());
        self.dual_write(&entry).await?;

        tracing::debug!(
            session_id = %entry.session_id,
            key = %entry.key,
            timestamp = entry.timestamp,
            hash = %entry.hash,
            "stored log entry"
        );
        Ok(entry)
    }

    /// Store a proof. Proofs are persisted like any entry but never folded.
    pub async fn store_proof(
        &self,
        session_id: SessionId,
        operation: impl Into<String>,
        proof: impl Into<String>,
    ) -> Result<LogEntry> {
        self.store(LogEntryDraft::proof(session_id, operation, proof))
            .await
    }

    /// Store an entry signed by another gateway, preserving its timestamp,
    /// hash and signature.
    ///
    /// The key derivation, hash and signature are verified first.
    pub async fn ingest(&self, entry: &LogEntry) -> Result<InsertResult> {
        entry.verify()?;
        let result = self.dual_write(entry).await?;
        self.clock.fetch_max(entry.timestamp, Ordering::SeqCst);

        if result == InsertResult::Inserted {
            tracing::debug!(
                session_id = %entry.session_id,
                key = %entry.key,
                signer = %entry.signer_public_key,
                "ingested foreign log entry"
            );
        }
        Ok(result)
    }

    async fn dual_write(&self, entry: &LogEntry) -> Result<InsertResult> {
        let content_id = self.content.put(&entry.canonical_bytes()).await?;
        if content_id != entry.hash {
            return Err(GatewayError::IntegrityViolation {
                key: entry.key.clone(),
                reason: format!(
                    "content store returned {} for entry hash {}",
                    content_id, entry.hash
                ),
            });
        }

        match self.log.insert_entry(entry).await? {
            InsertResult::Conflict { existing } => Err(GatewayError::Conflict {
                key: entry.key.clone(),
                existing,
            }),
            result => Ok(result),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_by_key(&self, key: &LogKey) -> Result<Option<LogEntry>> {
        Ok(self.log.get_entry(key).await?)
    }

    /// Read an entry's content back from the content-addressed store.
    ///
    /// The relational row supplies the content ID; the bytes must hash to it
    /// and decode to content under the same key.
    pub async fn get_from_content_store(&self, key: &LogKey) -> Result<Option<LogContent>> {
        let Some(row) = self.log.get_entry(key).await? else {
            return Ok(None);
        };

        let bytes = self
            .content
            .get(&row.hash)
            .await?
            .ok_or_else(|| GatewayError::IntegrityViolation {
                key: key.clone(),
                reason: format!("content {} missing from content store", row.hash),
            })?;

        let content = decode_content(&bytes)?;
        if content.key != *key {
            return Err(GatewayError::IntegrityViolation {
                key: key.clone(),
                reason: format!("content {} belongs to {}", row.hash, content.key),
            });
        }
        Ok(Some(content))
    }

    /// Cross-check one entry: the relational row must verify on its own, and
    /// the content store must hold exactly the same content.
    pub async fn verify_integrity(&self, key: &LogKey) -> Result<()> {
        let row = self
            .log
            .get_entry(key)
            .await?
            .ok_or_else(|| GatewayError::EntryNotFound(key.clone()))?;

        row.verify().map_err(|e| GatewayError::IntegrityViolation {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let content = self
            .get_from_content_store(key)
            .await?
            .ok_or_else(|| GatewayError::EntryNotFound(key.clone()))?;

        if content != row.content() {
            return Err(GatewayError::IntegrityViolation {
                key: key.clone(),
                reason: "relational row and content store disagree".to_string(),
            });
        }
        Ok(())
    }

    /// The entry with the greatest timestamp for a session.
    pub async fn get_latest(&self, session_id: &SessionId) -> Result<Option<LogEntry>> {
        Ok(self.log.get_latest_entry(session_id).await?)
    }

    /// Every entry, across sessions, with `timestamp > after`, ascending.
    pub async fn get_since(&self, after: i64) -> Result<Vec<LogEntry>> {
        Ok(self.log.get_entries_since(after).await?)
    }

    pub async fn get_session_entries(&self, session_id: &SessionId) -> Result<Vec<LogEntry>> {
        Ok(self.log.get_session_entries(session_id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        Ok(self.log.list_sessions().await?)
    }
}
