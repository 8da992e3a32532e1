//! Error types for recovery transport.

use thiserror::Error;

use crate::envelope::ErrorCode;

/// Errors that can occur while moving recovery messages.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No gateway answers at the address.
    #[error("gateway unreachable at {0}")]
    Unreachable(String),

    /// Envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A single attempt ran past its deadline.
    #[error("attempt timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The counterpart answered with an error envelope.
    #[error("remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The counterpart answered with the wrong message type.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

impl TransportError {
    /// Whether another attempt might succeed.
    ///
    /// Only delivery failures are retried. A remote rejection is an answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Timeout { .. }
        )
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
