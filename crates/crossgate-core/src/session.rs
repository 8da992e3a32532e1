//! Session state.
//!
//! A [`Session`] is one gateway's view of a cross-chain transfer. Every log
//! entry (except proofs) carries a [`SessionSnapshot`] of the session as it
//! was when the step was recorded; folding those snapshots in timestamp order
//! reconstructs the session (see [`crate::fold`]).

use serde::{Deserialize, Serialize};

use crate::crypto::{Blake3Hash, Ed25519PublicKey};
use crate::error::CoreError;
use crate::phase::PhaseOrder;
use crate::types::SessionId;

/// Which side of the transfer a gateway plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRole {
    /// The source-side gateway that initiated the transfer.
    Client,
    /// The recipient-side gateway.
    Server,
}

impl GatewayRole {
    pub fn other(self) -> Self {
        match self {
            GatewayRole::Client => GatewayRole::Server,
            GatewayRole::Server => GatewayRole::Client,
        }
    }
}

/// Live coordination state of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Most advanced phase tag recorded, if any.
    pub phase: Option<String>,
    /// Ordinal protocol step. Never decreases.
    pub step: u64,
    pub last_sequence_number: Option<u64>,
    /// Watermark: timestamp of the newest durably logged entry. Never regresses.
    pub last_log_entry_timestamp: Option<i64>,
    /// Local receive time of the last message from the counterpart.
    pub last_message_received_timestamp: Option<i64>,
    pub source_gateway_public_key: Ed25519PublicKey,
    pub recipient_gateway_public_key: Ed25519PublicKey,
    pub source_base_path: Option<String>,
    pub recipient_base_path: Option<String>,
    pub max_retries: Option<u32>,
    pub max_timeout_ms: Option<u64>,
    pub rollback: bool,
    pub rollback_proofs: Vec<String>,
    pub rollback_actions_performed: Vec<String>,
}

impl Session {
    /// A fresh session between two gateways, before any step is logged.
    pub fn new(
        session_id: SessionId,
        source_gateway_public_key: Ed25519PublicKey,
        recipient_gateway_public_key: Ed25519PublicKey,
    ) -> Self {
        Self {
            session_id,
            phase: None,
            step: 0,
            last_sequence_number: None,
            last_log_entry_timestamp: None,
            last_message_received_timestamp: None,
            source_gateway_public_key,
            recipient_gateway_public_key,
            source_base_path: None,
            recipient_base_path: None,
            max_retries: None,
            max_timeout_ms: None,
            rollback: false,
            rollback_proofs: Vec::new(),
            rollback_actions_performed: Vec::new(),
        }
    }

    /// The role `key` plays in this session, `None` if it is neither party.
    pub fn role_of(&self, key: &Ed25519PublicKey) -> Option<GatewayRole> {
        if *key == self.source_gateway_public_key {
            Some(GatewayRole::Client)
        } else if *key == self.recipient_gateway_public_key {
            Some(GatewayRole::Server)
        } else {
            None
        }
    }

    pub fn public_key_of(&self, role: GatewayRole) -> &Ed25519PublicKey {
        match role {
            GatewayRole::Client => &self.source_gateway_public_key,
            GatewayRole::Server => &self.recipient_gateway_public_key,
        }
    }

    pub fn base_path_of(&self, role: GatewayRole) -> Option<&str> {
        match role {
            GatewayRole::Client => self.source_base_path.as_deref(),
            GatewayRole::Server => self.recipient_base_path.as_deref(),
        }
    }

    /// Whether the session reached the terminal phase.
    pub fn is_closed(&self, phases: &PhaseOrder) -> bool {
        self.phase.as_deref().is_some_and(|p| phases.is_terminal(p))
    }

    /// Advance the watermark. Returns whether it moved.
    pub fn advance_watermark(&mut self, timestamp: i64) -> bool {
        match self.last_log_entry_timestamp {
            Some(current) if current >= timestamp => false,
            _ => {
                self.last_log_entry_timestamp = Some(timestamp);
                true
            }
        }
    }

    /// Snapshot of every field, as logged in an entry's `data`.
    pub fn to_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase.clone(),
            step: Some(self.step),
            last_sequence_number: self.last_sequence_number,
            last_log_entry_timestamp: self.last_log_entry_timestamp,
            last_message_received_timestamp: self.last_message_received_timestamp,
            source_gateway_public_key: Some(self.source_gateway_public_key),
            recipient_gateway_public_key: Some(self.recipient_gateway_public_key),
            source_base_path: self.source_base_path.clone(),
            recipient_base_path: self.recipient_base_path.clone(),
            max_retries: self.max_retries,
            max_timeout_ms: self.max_timeout_ms,
            rollback: Some(self.rollback),
            rollback_proofs: self.rollback_proofs.clone(),
            rollback_actions_performed: self.rollback_actions_performed.clone(),
        }
    }

    /// Rebuild a session from a folded snapshot.
    ///
    /// Public keys and base paths are security relevant and have no default:
    /// a snapshot lacking any of them is rejected.
    pub fn from_snapshot(session_id: SessionId, snapshot: &SessionSnapshot) -> Result<Self, CoreError> {
        let missing = |field| CoreError::MissingField {
            session_id: session_id.clone(),
            field,
        };

        let source_gateway_public_key = snapshot
            .source_gateway_public_key
            .ok_or_else(|| missing("source_gateway_public_key"))?;
        let recipient_gateway_public_key = snapshot
            .recipient_gateway_public_key
            .ok_or_else(|| missing("recipient_gateway_public_key"))?;
        let source_base_path = snapshot
            .source_base_path
            .clone()
            .ok_or_else(|| missing("source_base_path"))?;
        let recipient_base_path = snapshot
            .recipient_base_path
            .clone()
            .ok_or_else(|| missing("recipient_base_path"))?;

        Ok(Self {
            phase: snapshot.phase.clone(),
            step: snapshot.step.unwrap_or(0),
            last_sequence_number: snapshot.last_sequence_number,
            last_log_entry_timestamp: snapshot.last_log_entry_timestamp,
            last_message_received_timestamp: snapshot.last_message_received_timestamp,
            source_gateway_public_key,
            recipient_gateway_public_key,
            source_base_path: Some(source_base_path),
            recipient_base_path: Some(recipient_base_path),
            max_retries: snapshot.max_retries,
            max_timeout_ms: snapshot.max_timeout_ms,
            rollback: snapshot.rollback.unwrap_or(false),
            rollback_proofs: snapshot.rollback_proofs.clone(),
            rollback_actions_performed: snapshot.rollback_actions_performed.clone(),
            session_id,
        })
    }

    /// Blake3 digest of the shared part of the session.
    ///
    /// Receive times and the watermark are local bookkeeping and are left
    /// out, so two gateways that converged produce the same digest.
    pub fn state_digest(&self) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"crossgate-session-v1:");
        hasher.update(self.session_id.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.phase.as_deref().unwrap_or("").as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.step.to_be_bytes());
        hasher.update(&self.last_sequence_number.unwrap_or(0).to_be_bytes());
        hasher.update(self.source_gateway_public_key.as_bytes());
        hasher.update(self.recipient_gateway_public_key.as_bytes());
        for path in [&self.source_base_path, &self.recipient_base_path] {
            hasher.update(path.as_deref().unwrap_or("").as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&self.max_retries.unwrap_or(0).to_be_bytes());
        hasher.update(&self.max_timeout_ms.unwrap_or(0).to_be_bytes());
        hasher.update(&[self.rollback as u8]);
        for list in [&self.rollback_proofs, &self.rollback_actions_performed] {
            hasher.update(&(list.len() as u64).to_be_bytes());
            for item in list {
                hasher.update(item.as_bytes());
                hasher.update(&[0]);
            }
        }
        Blake3Hash(*hasher.finalize().as_bytes())
    }
}

/// Partial session state carried in a log entry's `data`.
///
/// Every field is optional so handlers may log only what a step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_log_entry_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_received_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_gateway_public_key: Option<Ed25519PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_gateway_public_key: Option<Ed25519PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_base_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_base_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_proofs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_actions_performed: Vec<String>,
}

impl SessionSnapshot {
    /// Serialize for a log entry's `data` field.
    pub fn to_data(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Parse a log entry's `data` field.
    pub fn from_data(session_id: &SessionId, data: &str) -> Result<Self, CoreError> {
        serde_json::from_str(data).map_err(|e| CoreError::MalformedSnapshot {
            session_id: session_id.clone(),
            reason: e.to_string(),
        })
    }
}
