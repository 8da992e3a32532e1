//! # crossgate store
//!
//! Storage for the audit log. Every entry is written twice:
//!
//! - [`LogStore`] - relational, keyed by log key, queried by session and time
//! - [`ContentStore`] - content-addressed by SHA-256, the tamper-evident copy
//!
//! ## Implementations
//!
//! - [`SqliteLogStore`] - durable relational store
//! - [`FsContentStore`] - durable directory of hash-named blobs
//! - [`MemoryLogStore`], [`MemoryContentStore`] - in-memory, for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crossgate_store::{FsContentStore, SqliteLogStore};
//!
//! let log = SqliteLogStore::open("gateway.db").unwrap();
//! let content = FsContentStore::open("gateway-content").unwrap();
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: inserting the same entry twice returns `AlreadyExists`
//! - **Conflict detection**: a different entry under an existing key returns `Conflict`
//! - **Verified reads**: content stores refuse to return bytes that do not hash to their ID

pub mod error;
pub mod fs;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use fs::FsContentStore;
pub use memory::{MemoryContentStore, MemoryLogStore};
pub use sqlite::SqliteLogStore;
pub use traits::{ContentStore, InsertResult, LogStore};
