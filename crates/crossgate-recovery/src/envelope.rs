//! Request and response envelopes.
//!
//! A transport carries exactly one [`RecoveryRequest`] and gets back exactly
//! one [`RecoveryResponse`]. Both are tagged unions so the receiver can
//! dispatch without guessing at message shapes.

use serde::{Deserialize, Serialize};

use crossgate_core::{
    RecoverMessage, RecoverSuccessMessage, RecoverUpdateAckMessage, RecoverUpdateMessage,
    RollbackAckMessage, RollbackMessage, SessionId,
};

/// Messages a requester sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryRequest {
    Recover(RecoverMessage),
    RecoverUpdateAck(RecoverUpdateAckMessage),
    Rollback(RollbackMessage),
}

impl RecoveryRequest {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryRequest::Recover(_) => "recover",
            RecoveryRequest::RecoverUpdateAck(_) => "recover_update_ack",
            RecoveryRequest::Rollback(_) => "rollback",
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            RecoveryRequest::Recover(m) => m.session_id(),
            RecoveryRequest::RecoverUpdateAck(m) => m.session_id(),
            RecoveryRequest::Rollback(m) => m.session_id(),
        }
    }
}

/// Messages a responder answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryResponse {
    RecoverUpdate(RecoverUpdateMessage),
    RecoverSuccess(RecoverSuccessMessage),
    RollbackAck(RollbackAckMessage),
    /// The responder rejected the request.
    Error {
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl RecoveryResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        RecoveryResponse::Error {
            code,
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryResponse::RecoverUpdate(_) => "recover_update",
            RecoveryResponse::RecoverSuccess(_) => "recover_success",
            RecoveryResponse::RollbackAck(_) => "rollback_ack",
            RecoveryResponse::Error { .. } => "error",
        }
    }
}

/// Why a responder rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown/unspecified error.
    Unknown,
    /// The responder has no such session.
    SessionNotFound,
    /// Signature did not verify against the expected sender.
    InvalidSignature,
    /// Sender is not allowed to speak for the session.
    NotAuthorized,
    /// Session state on the responder is incomplete.
    IncompleteSession,
    /// Internal error on the responder.
    InternalError,
}
