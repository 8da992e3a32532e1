//! The gateway: one party of a cross-chain transfer.
//!
//! Brings together the signature service, the audit log, the session store
//! and the recovery transport. Ledger-side handlers log their steps through
//! [`Gateway::record_step`]; after a crash, [`Gateway::recover_open_sessions`]
//! restores every session from the log before new traffic is accepted.

use std::sync::Arc;

use crossgate_core::{
    now_millis, Ed25519PublicKey, GatewayRole, Keypair, LogEntry, LogEntryDraft, PhaseOrder,
    Session, SessionId,
};
use crossgate_recovery::Transport;
use crossgate_store::{ContentStore, FsContentStore, LogStore, SqliteLogStore};

use crate::audit_log::AuditLog;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::recovery::RecoveryReport;
use crate::session_store::{RebuildReport, SessionStore};
use crate::signature::SignatureService;

/// Outcome of the crash-recovery bootstrap.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Local rebuild from the audit log.
    pub rebuild: RebuildReport,
    /// Remote Recover rounds that completed.
    pub recovered: Vec<RecoveryReport>,
    /// Remote Recover rounds that failed. The sessions stay restored locally.
    pub failed: Vec<(SessionId, String)>,
}

pub struct Gateway<L: LogStore, C: ContentStore, T: Transport> {
    pub(crate) config: GatewayConfig,
    pub(crate) signer: Arc<SignatureService>,
    pub(crate) audit_log: AuditLog<L, C>,
    pub(crate) sessions: SessionStore,
    pub(crate) transport: T,
    pub(crate) backup_keys: Vec<Ed25519PublicKey>,
}

impl<L: LogStore, C: ContentStore, T: Transport> Gateway<L, C, T> {
    /// Create a gateway over its stores and transport.
    ///
    /// The session store starts empty; call [`Self::recover_open_sessions`]
    /// to restore it.
    pub async fn new(
        config: GatewayConfig,
        keypair: Keypair,
        log_store: L,
        content_store: C,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        let phases = config.phase_order()?;
        let backup_keys = config.backup_keys()?;

        let signer = Arc::new(SignatureService::new(keypair));
        let audit_log = AuditLog::open(log_store, content_store, Arc::clone(&signer)).await?;

        tracing::info!(
            gateway = %config.name,
            public_key = %signer.public_key(),
            "gateway opened"
        );

        Ok(Self {
            config,
            signer,
            audit_log,
            sessions: SessionStore::new(phases),
            transport,
            backup_keys,
        })
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.signer.public_key()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn phases(&self) -> &PhaseOrder {
        self.sessions.phases()
    }

    pub fn audit_log(&self) -> &AuditLog<L, C> {
        &self.audit_log
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn signature_service(&self) -> &SignatureService {
        &self.signer
    }

    /// This gateway's role in a session, `None` if it is not a party.
    pub fn role_in(&self, session: &Session) -> Option<GatewayRole> {
        session.role_of(&self.public_key())
    }

    pub fn is_client_gateway(&self, session_id: &SessionId) -> Result<bool> {
        let session = self.session(session_id)?;
        Ok(self.role_in(&session) == Some(GatewayRole::Client))
    }

    pub(crate) fn session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Normal Protocol Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log a protocol step and fold it into the live session.
    ///
    /// The entry's `data` is the snapshot of `session`; `log_type` is the
    /// phase that produced the step. The live session is updated with the
    /// same fold the rebuild uses, so the two can never disagree.
    pub async fn record_step(
        &self,
        session: &Session,
        log_type: &str,
        operation: &str,
    ) -> Result<LogEntry> {
        let data = session.to_snapshot().to_data()?;
        let draft = LogEntryDraft::new(session.session_id.clone(), log_type, operation, data);
        let entry = self.audit_log.store(draft).await?;
        self.sessions.apply_entry(&entry)?;

        tracing::info!(
            session_id = %entry.session_id,
            phase = log_type,
            operation,
            step = session.step,
            "recorded protocol step"
        );
        Ok(entry)
    }

    /// Apply `change` to the current session and log the result.
    ///
    /// The session is read right before its snapshot is taken, after any
    /// earlier suspension of the caller.
    pub async fn record_update<F>(
        &self,
        session_id: &SessionId,
        log_type: &str,
        operation: &str,
        change: F,
    ) -> Result<LogEntry>
    where
        F: FnOnce(&mut Session),
    {
        let mut session = self.session(session_id)?;
        change(&mut session);
        self.record_step(&session, log_type, operation).await
    }

    /// Log a proof for a session. Proofs do not change session state.
    pub async fn record_proof(
        &self,
        session_id: &SessionId,
        operation: &str,
        proof: &str,
    ) -> Result<LogEntry> {
        self.audit_log
            .store_proof(session_id.clone(), operation, proof)
            .await
    }

    /// Note that a message from the counterpart just arrived.
    pub fn touch_message_received(&self, session_id: &SessionId) {
        let now = now_millis();
        self.sessions.update(session_id, |s| {
            s.last_message_received_timestamp = Some(
                s.last_message_received_timestamp
                    .map_or(now, |previous| previous.max(now)),
            );
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Crash Recovery Bootstrap
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the crash-recovery bootstrap as configured.
    ///
    /// Remote rounds run only with `recover_remote_on_start`.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        self.recover_open_sessions(self.config.recover_remote_on_start)
            .await
    }

    /// Restore every session from the local audit log.
    ///
    /// With `remote`, each restored session that is not closed then runs an
    /// outbound Recover round to learn what the counterpart logged while this
    /// gateway was down. A failed round is reported, not fatal: the session
    /// stays restored and can be recovered later.
    pub async fn recover_open_sessions(&self, remote: bool) -> Result<BootstrapReport> {
        let rebuild = self.sessions.rebuild_from_log(&self.audit_log).await?;
        let mut report = BootstrapReport {
            rebuild,
            ..Default::default()
        };

        if !remote {
            return Ok(report);
        }

        for session in self.sessions.open_sessions() {
            let session_id = session.session_id;
            match self.send_recover_message(&session_id).await {
                Ok(recovered) => report.recovered.push(recovered),
                Err(e) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %e,
                        kind = ?e.kind(),
                        "remote recovery failed"
                    );
                    report.failed.push((session_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            gateway = %self.config.name,
            restored = report.rebuild.restored.len(),
            recovered = report.recovered.len(),
            failed = report.failed.len(),
            "bootstrap complete"
        );
        Ok(report)
    }
}

impl<T: Transport> Gateway<SqliteLogStore, FsContentStore, T> {
    /// Open a gateway on the durable stores named in `config.storage`.
    ///
    /// Without a `database_path` the log lives in an in-memory SQLite
    /// database; a `content_path` is always required.
    pub async fn open(config: GatewayConfig, keypair: Keypair, transport: T) -> Result<Self> {
        let log_store = match &config.storage.database_path {
            Some(path) => SqliteLogStore::open(path)?,
            None => SqliteLogStore::open_memory()?,
        };
        let content_path = config
            .storage
            .content_path
            .clone()
            .ok_or_else(|| GatewayError::Config("storage.content_path is required".to_string()))?;
        let content_store = FsContentStore::open(content_path)?;

        Self::new(config, keypair, log_store, content_store, transport).await
    }
}
