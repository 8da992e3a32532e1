//! Log entries: immutable, signed records of one protocol step.
//!
//! An entry is built from a [`LogEntryDraft`] (what happened) plus a
//! timestamp (when), then sealed: hashed over its canonical subset and signed
//! by the gateway that recorded it. Once sealed it is never mutated.
//! Corrections are new entries.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_content_bytes, entry_signing_message};
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, Sha256Hash};
use crate::error::CoreError;
use crate::types::{LogKey, SessionId};

/// Log type of proof records. Persisted, never folded into session state.
pub const PROOF_LOG_TYPE: &str = "proof";

/// Log type of rollback records.
pub const ROLLBACK_LOG_TYPE: &str = "rollback";

/// The hashed subset of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContent {
    pub session_id: SessionId,
    pub log_type: String,
    pub key: LogKey,
    pub operation: String,
    pub timestamp: i64,
    pub data: String,
}

/// A protocol step that has not been timestamped or signed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntryDraft {
    pub session_id: SessionId,
    pub log_type: String,
    pub operation: String,
    pub data: String,
}

impl LogEntryDraft {
    pub fn new(
        session_id: SessionId,
        log_type: impl Into<String>,
        operation: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            log_type: log_type.into(),
            operation: operation.into(),
            data: data.into(),
        }
    }

    /// A proof record. `data` is the raw proof.
    pub fn proof(session_id: SessionId, operation: impl Into<String>, proof: impl Into<String>) -> Self {
        Self::new(session_id, PROOF_LOG_TYPE, operation, proof)
    }

    /// The key this draft will be stored under.
    pub fn key(&self) -> LogKey {
        LogKey::derive(&self.session_id, &self.log_type, &self.operation)
    }

    /// Attach a timestamp.
    pub fn into_content(self, timestamp: i64) -> LogContent {
        let key = self.key();
        LogContent {
            session_id: self.session_id,
            log_type: self.log_type,
            key,
            operation: self.operation,
            timestamp,
            data: self.data,
        }
    }
}

/// One immutable, signed record of a protocol step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub session_id: SessionId,
    /// Phase tag of the step (or `proof` / `rollback`).
    #[serde(rename = "type")]
    pub log_type: String,
    pub key: LogKey,
    pub operation: String,
    /// Milliseconds since the Unix epoch, assigned by the recording gateway.
    pub timestamp: i64,
    /// Opaque serialized snapshot for this step.
    pub data: String,
    pub hash: Sha256Hash,
    pub signer_public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

impl LogEntry {
    /// Hash and sign a draft.
    pub fn seal(draft: LogEntryDraft, timestamp: i64, keypair: &Keypair) -> Self {
        let content = draft.into_content(timestamp);
        let hash = Sha256Hash::hash(&canonical_content_bytes(&content));
        let signature = keypair.sign(&entry_signing_message(&hash));

        Self {
            session_id: content.session_id,
            log_type: content.log_type,
            key: content.key,
            operation: content.operation,
            timestamp: content.timestamp,
            data: content.data,
            hash,
            signer_public_key: keypair.public_key(),
            signature,
        }
    }

    /// The hashed subset.
    pub fn content(&self) -> LogContent {
        LogContent {
            session_id: self.session_id.clone(),
            log_type: self.log_type.clone(),
            key: self.key.clone(),
            operation: self.operation.clone(),
            timestamp: self.timestamp,
            data: self.data.clone(),
        }
    }

    /// Canonical bytes of the hashed subset (what the content store holds).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_content_bytes(&self.content())
    }

    /// Recompute the hash from the entry's fields.
    pub fn compute_hash(&self) -> Sha256Hash {
        Sha256Hash::hash(&self.canonical_bytes())
    }

    /// Check the key derivation, the hash and the signature.
    pub fn verify(&self) -> Result<(), CoreError> {
        let expected_key = LogKey::derive(&self.session_id, &self.log_type, &self.operation);
        if expected_key != self.key {
            return Err(CoreError::KeyMismatch {
                expected: expected_key.to_string(),
                actual: self.key.to_string(),
            });
        }

        let actual = self.compute_hash();
        if actual != self.hash {
            return Err(CoreError::HashMismatch {
                expected: self.hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        self.signer_public_key
            .verify(&entry_signing_message(&self.hash), &self.signature)
    }

    pub fn is_proof(&self) -> bool {
        self.log_type == PROOF_LOG_TYPE
    }

    pub fn is_rollback(&self) -> bool {
        self.log_type == ROLLBACK_LOG_TYPE
    }
}
