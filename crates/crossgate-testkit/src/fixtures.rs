//! Test fixtures and helpers.
//!
//! A [`GatewayPair`] is two gateways on one [`MemoryNetwork`], each with its
//! own in-memory stores. A node can be crashed and restarted over the same
//! stores, which is all a crash-recovery test needs.

use std::sync::Arc;

use crossgate::{Gateway, GatewayConfig, Result};
use crossgate_core::{Ed25519PublicKey, Keypair, LogEntry, Session, SessionId};
use crossgate_recovery::{MemoryNetwork, MemoryTransport, RequestHandler};
use crossgate_store::{MemoryContentStore, MemoryLogStore};

/// A gateway over shared in-memory stores.
pub type MemoryGateway = Gateway<Arc<MemoryLogStore>, Arc<MemoryContentStore>, MemoryTransport>;

pub const CLIENT_PATH: &str = "gw-a";
pub const SERVER_PATH: &str = "gw-b";
pub const BACKUP_PATH: &str = "gw-backup";

/// Default per-attempt timeout of fixture sessions.
pub const SESSION_TIMEOUT_MS: u64 = 500;

/// One gateway on the test network.
pub struct TestNode {
    pub keypair: Keypair,
    pub config: GatewayConfig,
    pub log: Arc<MemoryLogStore>,
    pub content: Arc<MemoryContentStore>,
    pub gateway: Arc<MemoryGateway>,
    network: Arc<MemoryNetwork>,
}

impl TestNode {
    /// Start a gateway and serve it at `config.base_path`.
    pub async fn start(network: &Arc<MemoryNetwork>, keypair: Keypair, config: GatewayConfig) -> Result<Self> {
        let log = Arc::new(MemoryLogStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let gateway = Self::serve(network, &keypair, &config, &log, &content).await?;

        Ok(Self {
            keypair,
            config,
            log,
            content,
            gateway,
            network: Arc::clone(network),
        })
    }

    async fn serve(
        network: &Arc<MemoryNetwork>,
        keypair: &Keypair,
        config: &GatewayConfig,
        log: &Arc<MemoryLogStore>,
        content: &Arc<MemoryContentStore>,
    ) -> Result<Arc<MemoryGateway>> {
        let gateway = Arc::new(
            Gateway::new(
                config.clone(),
                keypair.clone(),
                Arc::clone(log),
                Arc::clone(content),
                network.transport(),
            )
            .await?,
        );
        let handler: Arc<dyn RequestHandler> = gateway.clone();
        network.register(config.base_path.clone(), handler).await;
        Ok(gateway)
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    pub fn base_path(&self) -> &str {
        &self.config.base_path
    }

    /// Take the node off the network. Its stores survive.
    pub async fn crash(&self) {
        self.network.unregister(&self.config.base_path).await;
    }

    /// Replace the gateway with a fresh one over the same stores.
    ///
    /// The new gateway starts with an empty session store, as after a real
    /// restart; bootstrapping it is up to the test.
    pub async fn restart(&mut self) -> Result<()> {
        self.crash().await;
        self.gateway =
            Self::serve(&self.network, &self.keypair, &self.config, &self.log, &self.content).await?;
        Ok(())
    }

    /// Log a step on this node.
    pub async fn log_step(&self, session: &Session, phase: &str, operation: &str) -> Result<LogEntry> {
        self.gateway.record_step(session, phase, operation).await
    }

    /// This node's live copy of a session.
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.gateway.sessions().get(session_id)
    }
}

/// Configuration of a fixture node serving at `base_path`.
pub fn node_config(name: &str, base_path: &str) -> GatewayConfig {
    GatewayConfig {
        name: name.to_string(),
        base_path: base_path.to_string(),
        ..Default::default()
    }
}

/// Deterministic keypair for fixture node `n`.
pub fn node_keypair(n: u8) -> Keypair {
    Keypair::from_seed(&[n; 32])
}

/// A fresh random session ID.
pub fn random_session_id() -> SessionId {
    SessionId::new(format!("session-{:016x}", rand::random::<u64>()))
}

/// A client gateway and a server gateway connected by a memory network.
pub struct GatewayPair {
    pub network: Arc<MemoryNetwork>,
    pub client: TestNode,
    pub server: TestNode,
}

impl GatewayPair {
    pub async fn new() -> Result<Self> {
        Self::with_server_config(node_config("server", SERVER_PATH)).await
    }

    /// Start a pair whose server uses `config`.
    pub async fn with_server_config(config: GatewayConfig) -> Result<Self> {
        crossgate::logging::init_test();
        let network = MemoryNetwork::new();
        let client = TestNode::start(&network, node_keypair(1), node_config("client", CLIENT_PATH)).await?;
        let server = TestNode::start(&network, node_keypair(2), config).await?;
        Ok(Self {
            network,
            client,
            server,
        })
    }

    /// A session between the two nodes, complete enough to recover.
    pub fn session(&self, id: &str) -> Session {
        let mut session = Session::new(SessionId::new(id), self.client.public_key(), self.server.public_key());
        session.source_base_path = Some(self.client.base_path().to_string());
        session.recipient_base_path = Some(self.server.base_path().to_string());
        session.last_sequence_number = Some(1);
        session.max_retries = Some(3);
        session.max_timeout_ms = Some(SESSION_TIMEOUT_MS);
        session
    }

    /// Log the same step on both nodes.
    pub async fn log_on_both(&self, session: &Session, phase: &str, operation: &str) -> Result<()> {
        self.client.log_step(session, phase, operation).await?;
        self.server.log_step(session, phase, operation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_has_distinct_parties() {
        let pair = GatewayPair::new().await.unwrap();
        assert_ne!(pair.client.public_key(), pair.server.public_key());

        let session = pair.session("s");
        assert_eq!(pair.client.gateway.role_in(&session), Some(crossgate_core::GatewayRole::Client));
        assert_eq!(pair.server.gateway.role_in(&session), Some(crossgate_core::GatewayRole::Server));
    }

    #[tokio::test]
    async fn test_restart_keeps_log_and_drops_sessions() {
        let mut pair = GatewayPair::new().await.unwrap();
        let session = pair.session("s");
        pair.client.log_step(&session, "init", "start").await.unwrap();

        pair.client.restart().await.unwrap();
        assert!(pair.client.session(&session.session_id).is_none());

        pair.client.gateway.bootstrap().await.unwrap();
        assert!(pair.client.session(&session.session_id).is_some());
    }

    #[test]
    fn test_random_session_ids_differ() {
        assert_ne!(random_session_id(), random_session_id());
    }
}
