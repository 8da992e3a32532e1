//! # crossgate testkit
//!
//! Testing utilities for crossgate.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: canonical log content bytes and hashes that every
//!   implementation must reproduce
//! - **Generators**: Proptest strategies for entries, snapshots and session logs
//! - **Fixtures**: two gateways on an in-memory network, with crash and restart
//!
//! ## Golden Vectors
//!
//! ```rust
//! use crossgate_testkit::vectors::{all_vectors, verify_all_vectors};
//!
//! assert!(verify_all_vectors().is_empty());
//! for vector in all_vectors() {
//!     println!("{}: {}", vector.name, vector.expected_hash);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use crossgate_testkit::generators::{entry_from_params, EntryParams};
//!
//! proptest! {
//!     #[test]
//!     fn entry_hash_is_deterministic(params: EntryParams) {
//!         prop_assert_eq!(entry_from_params(&params).hash, entry_from_params(&params).hash);
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use crossgate_testkit::fixtures::GatewayPair;
//!
//! let mut pair = GatewayPair::new().await?;
//! let session = pair.session("transfer-1");
//! pair.log_on_both(&session, "init", "start").await?;
//!
//! pair.client.restart().await?;
//! pair.client.gateway.recover_open_sessions(true).await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{GatewayPair, MemoryGateway, TestNode};
pub use generators::{entry_from_params, EntryParams};
pub use vectors::{all_vectors, content_from_vector, verify_all_vectors, GoldenVector};
