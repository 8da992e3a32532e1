//! # crossgate core
//!
//! Pure primitives for a cross-chain gateway's audit log and crash recovery:
//! signed log entries, session state and its fold, and recovery messages.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`LogEntry`] - One immutable, hashed and signed protocol step
//! - [`Session`] - A gateway's view of one transfer
//! - [`SessionSnapshot`] - Partial session state carried in an entry's `data`
//! - [`PhaseOrder`] - The configurable, ordered phase vocabulary
//! - [`Signed`] - A recovery message body plus its signature
//!
//! ## Canonicalization
//!
//! Entry hashes are SHA-256 over deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod fold;
pub mod log_entry;
pub mod messages;
pub mod phase;
pub mod session;
pub mod types;

pub use canonical::{canonical_content_bytes, decode_content, LOG_ENTRY_DOMAIN};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair, Sha256Hash};
pub use error::CoreError;
pub use fold::{fold, fold_entries};
pub use log_entry::{LogContent, LogEntry, LogEntryDraft, PROOF_LOG_TYPE, ROLLBACK_LOG_TYPE};
pub use messages::{
    MessageBody, Recover, RecoverMessage, RecoverSuccess, RecoverSuccessMessage, RecoverUpdate,
    RecoverUpdateAck, RecoverUpdateAckMessage, RecoverUpdateMessage, Rollback, RollbackAck,
    RollbackAckMessage, RollbackMessage, Signed,
};
pub use phase::PhaseOrder;
pub use session::{GatewayRole, Session, SessionSnapshot};
pub use types::{now_millis, LogKey, SessionId};
