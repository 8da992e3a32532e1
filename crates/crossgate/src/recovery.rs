//! The recovery protocol.
//!
//! One gateway (the requester) asks its counterpart (the responder) what it
//! logged for a session past the requester's watermark, applies the answer,
//! and confirms:
//!
//! ```text
//! requester                              responder
//!   |-------- Recover ------------------->|  check_valid_recover_message
//!   |<------- RecoverUpdate --------------|  send_recover_update_message
//!   |-------- RecoverUpdateAck ---------->|  check_valid_recover_update_ack_message
//!   |<------- RecoverSuccess -------------|
//! ```
//!
//! Rollback is a one-round exchange on the same transport.
//!
//! Every message is verified against the key of the other party of the
//! session before anything it carries is used. A failed verification rejects
//! the whole message.

use async_trait::async_trait;

use crossgate_core::{
    fold_entries, Ed25519PublicKey, GatewayRole, LogEntry, MessageBody, Recover, RecoverMessage,
    RecoverSuccess, RecoverSuccessMessage, RecoverUpdate, RecoverUpdateAck,
    RecoverUpdateAckMessage, RecoverUpdateMessage, Rollback, RollbackAck, RollbackAckMessage,
    RollbackMessage, Session, SessionId, Sha256Hash, Signed, ROLLBACK_LOG_TYPE,
};
use crossgate_recovery::{
    call_with_retry, RecoveryRequest, RecoveryResponse, RequestHandler, RetryPolicy, Transport,
};
use crossgate_store::{ContentStore, LogStore};

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;

/// Outcome of one outbound recovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub session_id: SessionId,
    /// Entries that were new and got applied.
    pub applied: usize,
    /// Entries already present locally.
    pub duplicates: usize,
    /// Watermark after the round.
    pub watermark: Option<i64>,
    /// Whether this gateway took over the session as a backup.
    pub as_backup: bool,
}

/// What applying a RecoverUpdate changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Hashes of the entries that were new, in the order they were applied.
    pub applied: Vec<Sha256Hash>,
    pub duplicates: usize,
}

fn require<T>(value: Option<T>, session_id: &SessionId, field: &'static str) -> Result<T> {
    value.ok_or_else(|| GatewayError::IncompleteSession {
        session_id: session_id.clone(),
        field,
    })
}

fn retry_policy(session: &Session) -> Result<RetryPolicy> {
    let timeout = require(session.max_timeout_ms, &session.session_id, "max_timeout_ms")?;
    let retries = require(session.max_retries, &session.session_id, "max_retries")?;
    Ok(RetryPolicy::new(retries, timeout))
}

fn base_path_field(role: GatewayRole) -> &'static str {
    match role {
        GatewayRole::Client => "source_base_path",
        GatewayRole::Server => "recipient_base_path",
    }
}

/// Turn a response of the wrong type into an error.
fn unexpected(sent: &'static str, session_id: &SessionId, response: RecoveryResponse) -> GatewayError {
    match response {
        RecoveryResponse::Error { code, message } => GatewayError::Rejected {
            session_id: session_id.clone(),
            message: sent,
            code,
            reason: message,
        },
        other => GatewayError::UnexpectedResponse {
            sent,
            got: other.name(),
        },
    }
}

impl<L: LogStore, C: ContentStore, T: Transport> Gateway<L, C, T> {
    /// Verify a message from the other party of its session.
    fn verify_from_counterpart<B: MessageBody>(
        &self,
        message: &Signed<B>,
    ) -> Result<Session> {
        let session = self.session(message.session_id())?;
        let role = self
            .role_in(&session)
            .ok_or_else(|| GatewayError::NotAParty(session.session_id.clone()))?;
        self.signer
            .verify_message(message, session.public_key_of(role.other()))?;
        self.touch_message_received(&session.session_id);
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outbound Recover (requester)
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a full recovery round for a session against its counterpart.
    ///
    /// Fails without sending anything if the session lacks its retry policy,
    /// either base path, its sequence number or its watermark.
    pub async fn send_recover_message(&self, session_id: &SessionId) -> Result<RecoveryReport> {
        let session = self.session(session_id)?;
        let policy = retry_policy(&session)?;
        let source_path = require(session.source_base_path.clone(), session_id, "source_base_path")?;
        let recipient_path = require(
            session.recipient_base_path.clone(),
            session_id,
            "recipient_base_path",
        )?;
        let sequence_number = require(session.last_sequence_number, session_id, "last_sequence_number")?;
        let watermark = require(
            session.last_log_entry_timestamp,
            session_id,
            "last_log_entry_timestamp",
        )?;

        let role = self.role_in(&session);
        let as_backup = role.is_none();
        let target = match role {
            Some(GatewayRole::Server) => source_path,
            Some(GatewayRole::Client) | None => recipient_path,
        };

        // Entries logged before a takeover are signed by the replaced key.
        let mut trusted = vec![
            session.source_gateway_public_key,
            session.recipient_gateway_public_key,
        ];

        let recover = Recover {
            session_id: session_id.clone(),
            phase: session.phase.clone(),
            sequence_number,
            last_log_entry_timestamp: watermark,
            is_backup: as_backup,
            new_base_path: as_backup.then(|| self.config.base_path.clone()),
            new_gateway_public_key: as_backup.then(|| self.public_key()),
        };
        let message = self.signer.sign_message(recover)?;

        let replaced = as_backup.then(|| {
            (
                session.source_gateway_public_key,
                session.source_base_path.clone(),
            )
        });
        if as_backup {
            self.take_over_source_role(session_id)?;
            trusted.push(self.public_key());
        }

        let outcome = match self
            .run_recover_round(session_id, &target, message, &trusted, policy, as_backup)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some((key, base_path)) = replaced {
                    self.sessions.update(session_id, |s| {
                        s.source_gateway_public_key = key;
                        s.source_base_path = base_path;
                    });
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "recover as backup failed, source role restored"
                    );
                }
                return Err(e);
            }
        };

        let report = RecoveryReport {
            session_id: session_id.clone(),
            applied: outcome.applied.len(),
            duplicates: outcome.duplicates,
            watermark: self
                .sessions
                .get(session_id)
                .and_then(|s| s.last_log_entry_timestamp),
            as_backup,
        };
        tracing::info!(
            session_id = %session_id,
            applied = report.applied,
            duplicates = report.duplicates,
            "recovery complete"
        );
        Ok(report)
    }

    /// Send the Recover, apply the answer, and confirm it.
    async fn run_recover_round(
        &self,
        session_id: &SessionId,
        target: &str,
        message: RecoverMessage,
        trusted: &[Ed25519PublicKey],
        policy: RetryPolicy,
        as_backup: bool,
    ) -> Result<UpdateOutcome> {
        let watermark = message.body.last_log_entry_timestamp;
        tracing::info!(
            session_id = %session_id,
            target = %target,
            watermark,
            as_backup,
            "sending recover"
        );

        let response =
            call_with_retry(&self.transport, target, &RecoveryRequest::Recover(message), policy)
                .await?;
        let update = match response {
            RecoveryResponse::RecoverUpdate(update) => update,
            other => return Err(unexpected(Recover::NAME, session_id, other)),
        };

        let outcome = self.apply_recover_update(&update, trusted).await?;
        if as_backup {
            // Recovered entries may carry the replaced source key.
            self.take_over_source_role(session_id)?;
        }

        let ack = self.signer.sign_message(RecoverUpdateAck {
            session_id: session_id.clone(),
            success: true,
            changed_entries_hash: outcome.applied.clone(),
        })?;
        let response = call_with_retry(
            &self.transport,
            target,
            &RecoveryRequest::RecoverUpdateAck(ack),
            policy,
        )
        .await?;
        let success = match response {
            RecoveryResponse::RecoverSuccess(success) => success,
            other => return Err(unexpected(RecoverUpdateAck::NAME, session_id, other)),
        };
        self.check_valid_recover_success_message(&success)?;
        Ok(outcome)
    }

    /// Replace the session's source key and base path with this gateway's.
    fn take_over_source_role(&self, session_id: &SessionId) -> Result<()> {
        if self.config.base_path.is_empty() {
            return Err(GatewayError::Config(
                "a backup gateway needs its own base_path".to_string(),
            ));
        }
        let key = self.public_key();
        let base_path = self.config.base_path.clone();
        self.sessions
            .update(session_id, |s| {
                s.source_gateway_public_key = key;
                s.source_base_path = Some(base_path);
            })
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound Recover (responder)
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify a Recover and advance the local watermark to the one it carries.
    ///
    /// A message flagged as coming from a backup gateway is accepted only if
    /// the new key is on the configured allow list; it is verified against
    /// that key, and the session's source role is handed over to it.
    pub fn check_valid_recover_message(&self, message: &RecoverMessage) -> Result<()> {
        let body = &message.body;
        let session_id = &body.session_id;

        if body.is_backup {
            self.accept_backup(message)?;
        } else {
            self.verify_from_counterpart(message)?;
        }

        let advanced = self
            .sessions
            .update(session_id, |s| s.advance_watermark(body.last_log_entry_timestamp))
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))?;

        tracing::debug!(
            session_id = %session_id,
            watermark = body.last_log_entry_timestamp,
            advanced,
            "valid recover message"
        );
        Ok(())
    }

    fn accept_backup(&self, message: &RecoverMessage) -> Result<()> {
        let body = &message.body;
        let session_id = &body.session_id;
        let malformed = |reason: &str| GatewayError::MalformedMessage {
            session_id: session_id.clone(),
            message: "recover",
            reason: reason.to_string(),
        };

        let session = self.session(session_id)?;
        let new_key = body
            .new_gateway_public_key
            .ok_or_else(|| malformed("backup recover without new_gateway_public_key"))?;
        let new_path = body
            .new_base_path
            .clone()
            .ok_or_else(|| malformed("backup recover without new_base_path"))?;

        if self.role_in(&session) != Some(GatewayRole::Server) {
            return Err(malformed("only the source role can be taken over"));
        }
        if !self.backup_keys.contains(&new_key) {
            return Err(GatewayError::BackupNotAllowed {
                session_id: session_id.clone(),
                key: new_key,
            });
        }
        self.signer.verify_message(message, &new_key)?;

        self.sessions.update(session_id, |s| {
            s.source_gateway_public_key = new_key;
            s.source_base_path = Some(new_path.clone());
        });
        self.touch_message_received(session_id);

        tracing::warn!(
            session_id = %session_id,
            backup = %new_key,
            base_path = %new_path,
            "backup gateway took over source role"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // RecoverUpdate
    // ─────────────────────────────────────────────────────────────────────────

    /// Answer a Recover: every entry of the session logged after the
    /// requester's watermark, ascending.
    pub async fn send_recover_update_message(&self, recover: &Recover) -> Result<RecoverUpdateMessage> {
        let recovered_logs: Vec<LogEntry> = self
            .audit_log
            .get_since(recover.last_log_entry_timestamp)
            .await?
            .into_iter()
            .filter(|e| e.session_id == recover.session_id)
            .collect();

        tracing::info!(
            session_id = %recover.session_id,
            since = recover.last_log_entry_timestamp,
            count = recovered_logs.len(),
            "sending recover update"
        );

        self.signer.sign_message(RecoverUpdate {
            session_id: recover.session_id.clone(),
            recovered_logs,
        })
    }

    /// Verify a RecoverUpdate and apply the entries not yet logged locally.
    ///
    /// Every carried entry must verify and be signed by a party of the
    /// session. If any does not, nothing is applied.
    pub async fn check_valid_recover_update_message(
        &self,
        message: &RecoverUpdateMessage,
    ) -> Result<UpdateOutcome> {
        let session = self.session(message.session_id())?;
        let trusted = [
            session.source_gateway_public_key,
            session.recipient_gateway_public_key,
        ];
        self.apply_recover_update(message, &trusted).await
    }

    async fn apply_recover_update(
        &self,
        message: &RecoverUpdateMessage,
        trusted: &[Ed25519PublicKey],
    ) -> Result<UpdateOutcome> {
        let session_id = message.session_id().clone();
        self.verify_from_counterpart(message)?;

        for entry in &message.body.recovered_logs {
            if entry.session_id != session_id {
                return Err(GatewayError::MalformedMessage {
                    session_id,
                    message: "recover_update",
                    reason: format!("carries entry {} of another session", entry.key),
                });
            }
            entry.verify()?;
            if !trusted.contains(&entry.signer_public_key) {
                return Err(GatewayError::UnknownSigner {
                    session_id,
                    key: entry.key.clone(),
                    signer: entry.signer_public_key,
                });
            }
        }

        let mut entries: Vec<&LogEntry> = message.body.recovered_logs.iter().collect();
        entries.sort_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)));

        let mut outcome = UpdateOutcome::default();
        let mut fresh = Vec::new();
        for entry in entries {
            if let Some(local) = self.audit_log.get_by_key(&entry.key).await? {
                if local.hash != entry.hash {
                    tracing::warn!(
                        session_id = %session_id,
                        key = %entry.key,
                        local = %local.hash,
                        remote = %entry.hash,
                        "recovered entry differs from local entry, keeping local"
                    );
                }
                outcome.duplicates += 1;
                continue;
            }
            fresh.push(entry);
        }

        self.check_update_folds(&session_id, &fresh).await?;
        for entry in fresh {
            self.audit_log.ingest(entry).await?;
            self.sessions.apply_entry(entry)?;
            outcome.applied.push(entry.hash);
        }

        tracing::info!(
            session_id = %session_id,
            applied = outcome.applied.len(),
            duplicates = outcome.duplicates,
            "applied recover update"
        );
        Ok(outcome)
    }

    /// Fold the local log together with `fresh` without writing anything.
    ///
    /// Entries that do not carry a snapshot, or that leave the session
    /// incomplete, are refused before any of them is made durable.
    async fn check_update_folds(&self, session_id: &SessionId, fresh: &[&LogEntry]) -> Result<()> {
        if fresh.is_empty() {
            return Ok(());
        }
        let mut combined = self.audit_log.get_session_entries(session_id).await?;
        combined.extend(fresh.iter().map(|e| (*e).clone()));

        if let Some(snapshot) = fold_entries(&combined, self.phases())? {
            Session::from_snapshot(session_id.clone(), &snapshot)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // RecoverUpdateAck / RecoverSuccess
    // ─────────────────────────────────────────────────────────────────────────

    pub fn check_valid_recover_update_ack_message(&self, message: &RecoverUpdateAckMessage) -> Result<()> {
        self.verify_from_counterpart(message)?;
        tracing::debug!(
            session_id = %message.body.session_id,
            success = message.body.success,
            changed = message.body.changed_entries_hash.len(),
            "valid recover update ack"
        );
        Ok(())
    }

    pub fn build_recover_success_message(
        &self,
        session_id: &SessionId,
        success: bool,
    ) -> Result<RecoverSuccessMessage> {
        self.signer.sign_message(RecoverSuccess {
            session_id: session_id.clone(),
            success,
        })
    }

    pub fn check_valid_recover_success_message(&self, message: &RecoverSuccessMessage) -> Result<()> {
        self.verify_from_counterpart(message)?;
        if !message.body.success {
            return Err(GatewayError::NotAcknowledged {
                session_id: message.body.session_id.clone(),
                message: "recover",
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rollback
    // ─────────────────────────────────────────────────────────────────────────

    /// Log a rollback locally and notify the counterpart.
    ///
    /// The rollback entry is durable before anything is sent, so it survives
    /// a crash even if the notification does not get through.
    pub async fn send_rollback_message(
        &self,
        session_id: &SessionId,
        rollback_actions_performed: Vec<String>,
        rollback_proofs: Vec<String>,
    ) -> Result<()> {
        let session = self.session(session_id)?;
        let policy = retry_policy(&session)?;
        let role = self
            .role_in(&session)
            .ok_or_else(|| GatewayError::NotAParty(session_id.clone()))?;
        let target = require(
            session.base_path_of(role.other()).map(str::to_string),
            session_id,
            base_path_field(role.other()),
        )?;

        let operation = self.next_rollback_operation(session_id, "rollback").await?;
        self.record_update(session_id, ROLLBACK_LOG_TYPE, &operation, |s| {
            mark_rolled_back(s, &rollback_actions_performed, &rollback_proofs)
        })
        .await?;

        let message = self.signer.sign_message(Rollback {
            session_id: session_id.clone(),
            success: true,
            rollback_actions_performed,
            rollback_proofs,
        })?;

        tracing::info!(session_id = %session_id, target = %target, "sending rollback");
        let response =
            call_with_retry(&self.transport, &target, &RecoveryRequest::Rollback(message), policy)
                .await?;
        let ack = match response {
            RecoveryResponse::RollbackAck(ack) => ack,
            other => return Err(unexpected(Rollback::NAME, session_id, other)),
        };
        self.check_valid_rollback_ack_message(&ack)
    }

    /// Verify a counterpart's rollback and record it on this side.
    pub async fn check_valid_rollback_message(&self, message: &RollbackMessage) -> Result<()> {
        let session = self.verify_from_counterpart(message)?;
        let session_id = &session.session_id;
        let operation = self
            .next_rollback_operation(session_id, "rollback-received")
            .await?;
        self.record_update(session_id, ROLLBACK_LOG_TYPE, &operation, |s| {
            mark_rolled_back(
                s,
                &message.body.rollback_actions_performed,
                &message.body.rollback_proofs,
            )
        })
        .await?;

        tracing::warn!(
            session_id = %session_id,
            actions = message.body.rollback_actions_performed.len(),
            "counterpart rolled back session"
        );
        Ok(())
    }

    /// `<prefix>-<n>`, numbering this gateway's rollback records per session.
    async fn next_rollback_operation(&self, session_id: &SessionId, prefix: &str) -> Result<String> {
        let recorded = self
            .audit_log
            .get_session_entries(session_id)
            .await?
            .iter()
            .filter(|e| e.log_type == ROLLBACK_LOG_TYPE)
            .filter(|e| {
                e.operation
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(|n| n.parse::<u64>().is_ok())
            })
            .count();
        Ok(format!("{prefix}-{}", recorded + 1))
    }

    pub fn build_rollback_ack_message(&self, session_id: &SessionId, success: bool) -> Result<RollbackAckMessage> {
        self.signer.sign_message(RollbackAck {
            session_id: session_id.clone(),
            success,
        })
    }

    pub fn check_valid_rollback_ack_message(&self, message: &RollbackAckMessage) -> Result<()> {
        self.verify_from_counterpart(message)?;
        if !message.body.success {
            return Err(GatewayError::NotAcknowledged {
                session_id: message.body.session_id.clone(),
                message: "rollback",
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────────────────

    async fn respond(&self, request: RecoveryRequest) -> Result<RecoveryResponse> {
        match request {
            RecoveryRequest::Recover(message) => {
                self.check_valid_recover_message(&message)?;
                let update = self.send_recover_update_message(&message.body).await?;
                Ok(RecoveryResponse::RecoverUpdate(update))
            }
            RecoveryRequest::RecoverUpdateAck(message) => {
                self.check_valid_recover_update_ack_message(&message)?;
                let success =
                    self.build_recover_success_message(&message.body.session_id, message.body.success)?;
                Ok(RecoveryResponse::RecoverSuccess(success))
            }
            RecoveryRequest::Rollback(message) => {
                self.check_valid_rollback_message(&message).await?;
                let ack = self.build_rollback_ack_message(&message.body.session_id, true)?;
                Ok(RecoveryResponse::RollbackAck(ack))
            }
        }
    }
}

fn mark_rolled_back(session: &mut Session, actions: &[String], proofs: &[String]) {
    session.rollback = true;
    for action in actions {
        if !session.rollback_actions_performed.contains(action) {
            session.rollback_actions_performed.push(action.clone());
        }
    }
    for proof in proofs {
        if !session.rollback_proofs.contains(proof) {
            session.rollback_proofs.push(proof.clone());
        }
    }
}

#[async_trait]
impl<L: LogStore, C: ContentStore, T: Transport> RequestHandler for Gateway<L, C, T> {
    async fn handle(&self, request: RecoveryRequest) -> RecoveryResponse {
        let session_id = request.session_id().clone();
        let name = request.name();

        match self.respond(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    request = name,
                    error = %e,
                    kind = ?e.kind(),
                    "rejected recovery request"
                );
                RecoveryResponse::error(e.error_code(), e.to_string())
            }
        }
    }
}
