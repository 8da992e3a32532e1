//! Transport abstraction for recovery messages.
//!
//! Recovery is request/response: the caller names the counterpart by its
//! base path and waits for exactly one answer. Implementations may use HTTP,
//! gRPC, or anything else that can carry the JSON envelopes.

use async_trait::async_trait;

use crate::envelope::{RecoveryRequest, RecoveryResponse};
use crate::error::Result;

/// Outbound side: deliver a request, return the response.
///
/// Implementations must be thread-safe (Send + Sync). Timeouts and retries
/// are applied by the caller, see [`crate::retry`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, base_path: &str, request: RecoveryRequest) -> Result<RecoveryResponse>;
}

/// Inbound side: what a gateway exposes to its counterparts.
///
/// Handlers never fail at the transport level. A rejected request is
/// answered with [`RecoveryResponse::Error`].
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: RecoveryRequest) -> RecoveryResponse;
}

/// An in-memory network for tests.
///
/// Gateways register a handler under their base path. Addresses can be taken
/// down or slowed to exercise the retry and timeout paths.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    use serde::{de::DeserializeOwned, Serialize};
    use tokio::sync::RwLock;

    use crate::error::TransportError;

    /// Shared state for the memory network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        handlers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
        down: RwLock<HashSet<String>>,
        delays: RwLock<HashMap<String, Duration>>,
        calls: RwLock<HashMap<String, u32>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Serve `handler` at `base_path`, replacing any previous handler.
        pub async fn register(&self, base_path: impl Into<String>, handler: Arc<dyn RequestHandler>) {
            self.handlers.write().await.insert(base_path.into(), handler);
        }

        pub async fn unregister(&self, base_path: &str) {
            self.handlers.write().await.remove(base_path);
        }

        /// Refuse (or accept again) every call to `base_path`.
        pub async fn set_down(&self, base_path: &str, down: bool) {
            let mut set = self.down.write().await;
            if down {
                set.insert(base_path.to_string());
            } else {
                set.remove(base_path);
            }
        }

        /// Delay every delivery to `base_path`.
        pub async fn set_delay(&self, base_path: &str, delay: Duration) {
            self.delays.write().await.insert(base_path.to_string(), delay);
        }

        /// Number of delivery attempts made to `base_path`, failed ones included.
        pub async fn call_count(&self, base_path: &str) -> u32 {
            self.calls.read().await.get(base_path).copied().unwrap_or(0)
        }

        /// Create a transport connected to this network.
        pub fn transport(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                network: Arc::clone(self),
            }
        }
    }

    /// In-memory transport implementation.
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
    }

    fn through_wire<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
        let json = serde_json::to_vec(value).map_err(|e| TransportError::Codec(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TransportError::Codec(e.to_string()))
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn call(&self, base_path: &str, request: RecoveryRequest) -> Result<RecoveryResponse> {
            *self
                .network
                .calls
                .write()
                .await
                .entry(base_path.to_string())
                .or_insert(0) += 1;

            if self.network.down.read().await.contains(base_path) {
                return Err(TransportError::Unreachable(base_path.to_string()));
            }

            let handler = self
                .network
                .handlers
                .read()
                .await
                .get(base_path)
                .cloned()
                .ok_or_else(|| TransportError::Unreachable(base_path.to_string()))?;

            let delay = self.network.delays.read().await.get(base_path).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let request = through_wire(&request)?;
            let response = handler.handle(request).await;
            through_wire(&response)
        }
    }
}
