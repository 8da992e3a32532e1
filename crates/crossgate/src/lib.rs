//! # crossgate
//!
//! The coordination core of a cross-chain transfer gateway: session state,
//! a durable dual-written audit log, and crash recovery between the two
//! gateways of a transfer.
//!
//! ## Overview
//!
//! - **SignatureService**: signs and verifies log entries and recovery messages
//! - **AuditLog**: append-only record of every protocol step, written to a
//!   relational store and a content-addressed store
//! - **SessionStore**: live session state, rebuildable from the audit log
//! - **Recovery**: the Recover / RecoverUpdate exchange and the bootstrap that
//!   restores sessions after a crash
//!
//! ## Key Concepts
//!
//! - **LogEntry**: Immutable. Never edited. Corrections are new entries.
//! - **Watermark**: the newest durably logged timestamp of a session. Never regresses.
//! - **Fold**: one deterministic function applies entries to sessions, for
//!   rebuilds, recovery merges and normal logging alike.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crossgate::{Gateway, GatewayConfig};
//! use crossgate::core::Keypair;
//! use crossgate::transport::MemoryNetwork;
//!
//! async fn example() {
//!     let config = GatewayConfig::from_file("gateway.toml").unwrap();
//!     crossgate::logging::init_from_config(&config.logging);
//!
//!     let network = MemoryNetwork::new();
//!     let gateway = Gateway::open(config, Keypair::generate(), network.transport())
//!         .await
//!         .unwrap();
//!
//!     // Restore sessions from the log, then catch up with counterparts
//!     // if `recover_remote_on_start` is set.
//!     let report = gateway.bootstrap().await.unwrap();
//!     println!("restored {} sessions", report.rebuild.restored.len());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `crossgate::core` - entries, sessions, fold, messages
//! - `crossgate::store` - log and content stores
//! - `crossgate::transport` - envelopes, transport, retry policy

pub mod audit_log;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod recovery;
pub mod session_store;
pub mod signature;

pub use audit_log::AuditLog;
pub use config::{GatewayConfig, LoggingConfig, StorageConfig};
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::{BootstrapReport, Gateway};
pub use recovery::{RecoveryReport, UpdateOutcome};
pub use session_store::{RebuildReport, SessionStore};
pub use signature::SignatureService;

/// Core primitives.
pub mod core {
    pub use crossgate_core::*;
}

/// Storage backends.
pub mod store {
    pub use crossgate_store::*;
}

/// Recovery transport.
pub mod transport {
    pub use crossgate_recovery::*;
}
