//! # crossgate recovery
//!
//! The plumbing under the Recover / RecoverUpdate exchange: the request and
//! response envelopes, the [`Transport`] a gateway calls its counterpart
//! through, and the retry policy that bounds every outbound call.
//!
//! ## Message Flow
//!
//! ```text
//! requester                              responder
//!   |-------- Recover ------------------->|
//!   |<------- RecoverUpdate --------------|
//!   |-------- RecoverUpdateAck ---------->|
//!   |<------- RecoverSuccess -------------|
//! ```
//!
//! Each arrow is one [`Transport::call`]. The protocol logic itself lives in
//! the `crossgate` crate; this crate only moves envelopes.
//!
//! ## Key Properties
//!
//! - **Bounded**: every attempt has a timeout, every call has an attempt budget
//! - **Wire-shaped**: the in-memory network round-trips envelopes through JSON
//!   so tests exercise the same encoding a real transport would

pub mod envelope;
pub mod error;
pub mod retry;
pub mod transport;

pub use envelope::{ErrorCode, RecoveryRequest, RecoveryResponse};
pub use error::{Result, TransportError};
pub use retry::{call_with_retry, RetryPolicy};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, RequestHandler, Transport};
