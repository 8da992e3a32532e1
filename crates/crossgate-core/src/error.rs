//! Error types for crossgate core.

use thiserror::Error;

use crate::types::SessionId;

/// Errors that can occur while building, hashing, verifying or folding
/// log entries and recovery messages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("log key mismatch: expected {expected}, got {actual}")]
    KeyMismatch { expected: String, actual: String },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("session {session_id}: missing required field `{field}`")]
    MissingField {
        session_id: SessionId,
        field: &'static str,
    },

    #[error("session {session_id}: malformed snapshot: {reason}")]
    MalformedSnapshot { session_id: SessionId, reason: String },

    #[error("entry for session {found} folded into session {expected}")]
    SessionMismatch {
        expected: SessionId,
        found: SessionId,
    },

    #[error("invalid phase vocabulary: {0}")]
    InvalidPhases(String),
}
