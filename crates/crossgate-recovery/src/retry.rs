//! Retry and timeout policy for outbound recovery calls.
//!
//! A session carries `max_retries` and `max_timeout_ms`. The timeout bounds a
//! single attempt; `max_retries` bounds how many attempts are made in total.
//! Running out surfaces as [`TransportError::RetriesExhausted`], never as an
//! endless loop.

use std::time::Duration;

use crate::envelope::{RecoveryRequest, RecoveryResponse};
use crate::error::{Result, TransportError};
use crate::transport::Transport;

/// How hard to try one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts. Zero is treated as one.
    pub max_retries: u32,
    /// Deadline of each attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout_ms: u64) -> Self {
        Self {
            max_retries,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 5_000)
    }
}

/// Deliver `request`, retrying delivery failures within `policy`.
///
/// Remote rejections and codec errors are returned immediately.
pub async fn call_with_retry<T: Transport + ?Sized>(
    transport: &T,
    base_path: &str,
    request: &RecoveryRequest,
    policy: RetryPolicy,
) -> Result<RecoveryResponse> {
    let attempts = policy.attempts();
    let mut last = None;

    for attempt in 1..=attempts {
        let outcome = match tokio::time::timeout(policy.timeout, transport.call(base_path, request.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: policy.timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(response) => {
                if attempt > 1 {
                    tracing::debug!(base_path, attempt, "recovery call succeeded after retry");
                }
                return Ok(response);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    base_path,
                    attempt,
                    attempts,
                    message = request.name(),
                    error = %e,
                    "recovery call failed"
                );
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(TransportError::RetriesExhausted {
        attempts,
        last: last.map(|e| e.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ErrorCode;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::RequestHandler;
    use async_trait::async_trait;
    use crossgate_core::{Keypair, Rollback, RollbackMessage, SessionId};
    use std::sync::Arc;

    struct Reject;

    #[async_trait]
    impl RequestHandler for Reject {
        async fn handle(&self, _request: RecoveryRequest) -> RecoveryResponse {
            RecoveryResponse::error(ErrorCode::InvalidSignature, "bad signature")
        }
    }

    fn request() -> RecoveryRequest {
        let body = Rollback {
            session_id: SessionId::new("s"),
            success: true,
            rollback_actions_performed: vec![],
            rollback_proofs: vec![],
        };
        RecoveryRequest::Rollback(RollbackMessage::sign(body, &Keypair::from_seed(&[2; 32])).unwrap())
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_unreachable_peer() {
        let network = MemoryNetwork::new();
        let transport = network.transport();

        let err = call_with_retry(&transport, "gw-down", &request(), RetryPolicy::new(3, 50))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(network.call_count("gw-down").await, 3);
    }

    #[tokio::test]
    async fn test_slow_peer_times_out() {
        let network = MemoryNetwork::new();
        network.register("gw-slow", Arc::new(Reject)).await;
        network.set_delay("gw-slow", Duration::from_millis(500)).await;

        let err = call_with_retry(&network.transport(), "gw-slow", &request(), RetryPolicy::new(2, 20))
            .await
            .unwrap_err();

        match err {
            TransportError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remote_rejection_is_not_retried() {
        let network = MemoryNetwork::new();
        network.register("gw-b", Arc::new(Reject)).await;

        let response = call_with_retry(&network.transport(), "gw-b", &request(), RetryPolicy::new(5, 100))
            .await
            .unwrap();

        assert!(matches!(
            response,
            RecoveryResponse::Error {
                code: ErrorCode::InvalidSignature,
                ..
            }
        ));
        assert_eq!(network.call_count("gw-b").await, 1);
    }

    #[test]
    fn test_zero_retries_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, 10).attempts(), 1);
    }
}
