//! Error types for the gateway.

use crossgate_core::{CoreError, Ed25519PublicKey, LogKey, SessionId, Sha256Hash};
use crossgate_recovery::{ErrorCode, TransportError};
use crossgate_store::StoreError;
use thiserror::Error;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Hashing, signing, encoding or folding failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A session lacks a field the operation needs.
    #[error("session {session_id} is missing `{field}`")]
    IncompleteSession {
        session_id: SessionId,
        field: &'static str,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A recovery message did not verify against the expected sender.
    #[error("invalid {message} signature for session {session_id}")]
    InvalidSignature {
        session_id: SessionId,
        message: &'static str,
    },

    /// A recovered entry was signed by neither party of its session.
    #[error("entry {key} signed by {signer}, who is not a party to session {session_id}")]
    UnknownSigner {
        session_id: SessionId,
        key: LogKey,
        signer: Ed25519PublicKey,
    },

    /// This gateway is not a party to the session.
    #[error("gateway is not a party to session {0}")]
    NotAParty(SessionId),

    /// A backup gateway that is not on the allow list tried to take over.
    #[error("backup gateway {key} is not allowed for session {session_id}")]
    BackupNotAllowed {
        session_id: SessionId,
        key: Ed25519PublicKey,
    },

    /// A message is well signed but does not make sense.
    #[error("malformed {message} for session {session_id}: {reason}")]
    MalformedMessage {
        session_id: SessionId,
        message: &'static str,
        reason: String,
    },

    /// A different entry is already logged under the key.
    #[error("conflict at {key}: existing entry {existing}")]
    Conflict { key: LogKey, existing: Sha256Hash },

    /// The relational row and the content-addressed copy disagree.
    #[error("integrity violation at {key}: {reason}")]
    IntegrityViolation { key: LogKey, reason: String },

    #[error("log entry not found: {0}")]
    EntryNotFound(LogKey),

    /// The counterpart rejected a request.
    #[error("counterpart rejected {message} for session {session_id} ({code:?}): {reason}")]
    Rejected {
        session_id: SessionId,
        message: &'static str,
        code: ErrorCode,
        reason: String,
    },

    /// The counterpart answered with the wrong message type.
    #[error("unexpected response to {sent}: got {got}")]
    UnexpectedResponse {
        sent: &'static str,
        got: &'static str,
    },

    /// The counterpart answered, but reported failure.
    #[error("{message} for session {session_id} was not acknowledged")]
    NotAcknowledged {
        session_id: SessionId,
        message: &'static str,
    },
}

/// Error categories, as callers should react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Setup or session data is incomplete. Not retryable.
    Configuration,
    /// A signature or hash did not verify. The data must be discarded.
    Signature,
    /// A store failed or diverged.
    Storage,
    /// The exchange itself failed.
    Protocol,
    /// Retries ran out. The session is still recoverable later.
    Timeout,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Core(e) => match e {
                CoreError::InvalidSignature
                | CoreError::InvalidPublicKey
                | CoreError::HashMismatch { .. }
                | CoreError::KeyMismatch { .. } => ErrorKind::Signature,
                CoreError::MissingField { .. } | CoreError::InvalidPhases(_) => {
                    ErrorKind::Configuration
                }
                _ => ErrorKind::Protocol,
            },
            GatewayError::Store(_)
            | GatewayError::Conflict { .. }
            | GatewayError::IntegrityViolation { .. } => ErrorKind::Storage,
            GatewayError::Transport(e) => match e {
                TransportError::RetriesExhausted { .. } | TransportError::Timeout { .. } => {
                    ErrorKind::Timeout
                }
                _ => ErrorKind::Protocol,
            },
            GatewayError::Config(_) | GatewayError::IncompleteSession { .. } => {
                ErrorKind::Configuration
            }
            GatewayError::InvalidSignature { .. }
            | GatewayError::UnknownSigner { .. }
            | GatewayError::BackupNotAllowed { .. } => ErrorKind::Signature,
            GatewayError::SessionNotFound(_)
            | GatewayError::NotAParty(_)
            | GatewayError::MalformedMessage { .. }
            | GatewayError::EntryNotFound(_)
            | GatewayError::Rejected { .. }
            | GatewayError::UnexpectedResponse { .. }
            | GatewayError::NotAcknowledged { .. } => ErrorKind::Protocol,
        }
    }

    /// Code sent back to a counterpart whose request failed with this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            GatewayError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            GatewayError::NotAParty(_) | GatewayError::BackupNotAllowed { .. } => {
                ErrorCode::NotAuthorized
            }
            GatewayError::IncompleteSession { .. } => ErrorCode::IncompleteSession,
            _ if self.kind() == ErrorKind::Signature => ErrorCode::InvalidSignature,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
