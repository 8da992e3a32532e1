//! The session store: live, in-memory session state.
//!
//! Authoritative for protocol execution, never the source of truth: every
//! session can be rebuilt from the audit log at any time with
//! [`SessionStore::rebuild_from_log`]. Sessions are retired logically when
//! they reach the terminal phase and are never removed.
//!
//! All access goes through a `std::sync::RwLock` that is never held across an
//! `.await`. Read-modify-write happens inside one closure ([`SessionStore::update`],
//! [`SessionStore::apply_entry`]) so two interleaved handlers cannot lose an
//! update.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossgate_core::{fold, fold_entries, LogEntry, PhaseOrder, Session, SessionId};
use crossgate_store::{ContentStore, LogStore};

use crate::audit_log::AuditLog;
use crate::error::Result;

/// Outcome of a rebuild.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Sessions restored, sorted.
    pub restored: Vec<SessionId>,
    /// Sessions whose log could not be folded into a complete session.
    pub skipped: Vec<(SessionId, String)>,
}

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    phases: PhaseOrder,
}

impl SessionStore {
    pub fn new(phases: PhaseOrder) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            phases,
        }
    }

    pub fn phases(&self) -> &PhaseOrder {
        &self.phases
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.read().get(session_id).cloned()
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.read().contains_key(session_id)
    }

    /// Insert or replace a session.
    pub fn put(&self, session: Session) {
        self.write().insert(session.session_id.clone(), session);
    }

    /// Mutate a session in place. Returns `None` if it does not exist.
    pub fn update<F, R>(&self, session_id: &SessionId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        self.write().get_mut(session_id).map(f)
    }

    /// Fold one stored entry into its session.
    ///
    /// Creates the session if the entry carries enough to build one. Proof
    /// entries leave the session unchanged.
    pub fn apply_entry(&self, entry: &LogEntry) -> Result<Option<Session>> {
        let mut sessions = self.write();
        let existing = sessions.get(&entry.session_id);
        if entry.is_proof() {
            return Ok(existing.cloned());
        }

        let snapshot = fold(existing.map(Session::to_snapshot), entry, &self.phases)?;
        let session = Session::from_snapshot(entry.session_id.clone(), &snapshot)?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(Some(session))
    }

    /// Replace the whole map with sessions folded from the audit log.
    ///
    /// The log is read completely before the map is touched, and the new map
    /// is swapped in with one write. Sessions that cannot be reconstructed
    /// are reported and left out; nothing is filled in with defaults.
    pub async fn rebuild_from_log<L: LogStore, C: ContentStore>(
        &self,
        audit_log: &AuditLog<L, C>,
    ) -> Result<RebuildReport> {
        let mut rebuilt = HashMap::new();
        let mut report = RebuildReport::default();

        for session_id in audit_log.list_sessions().await? {
            let entries = audit_log.get_session_entries(&session_id).await?;
            let folded = fold_entries(&entries, &self.phases).and_then(|snapshot| {
                match snapshot {
                    Some(snapshot) => Session::from_snapshot(session_id.clone(), &snapshot).map(Some),
                    None => Ok(None),
                }
            });

            match folded {
                Ok(Some(session)) => {
                    rebuilt.insert(session_id.clone(), session);
                    report.restored.push(session_id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        "cannot reconstruct session from log, skipping"
                    );
                    report.skipped.push((session_id, e.to_string()));
                }
            }
        }

        *self.write() = rebuilt;
        tracing::info!(
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            "rebuilt sessions from audit log"
        );
        Ok(report)
    }

    /// Every session, sorted by ID.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    /// Sessions that have not reached the terminal phase, sorted by ID.
    pub fn open_sessions(&self) -> Vec<Session> {
        self.list()
            .into_iter()
            .filter(|s| !s.is_closed(&self.phases))
            .collect()
    }

    /// Open sessions whose counterpart has been silent longer than the
    /// session's `max_timeout_ms`.
    ///
    /// Silence is measured from the last received message, or from the last
    /// logged entry if nothing was received yet.
    pub fn stale_sessions(&self, now: i64) -> Vec<SessionId> {
        self.open_sessions()
            .into_iter()
            .filter(|s| {
                let (Some(timeout), Some(last_heard)) = (
                    s.max_timeout_ms,
                    s.last_message_received_timestamp
                        .or(s.last_log_entry_timestamp),
                ) else {
                    return false;
                };
                now.saturating_sub(last_heard) > i64::try_from(timeout).unwrap_or(i64::MAX)
            })
            .map(|s| s.session_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
