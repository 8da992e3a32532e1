//! Recovery protocol messages.
//!
//! Each message is an explicit body struct wrapped in [`Signed`]. The
//! signature covers `domain || CBOR(body)`, where the domain names the message
//! type and version, so a signature over one message type can never be
//! replayed as another.
//!
//! ```text
//! requester                              responder
//!   |-------- Recover ------------------->|
//!   |<------- RecoverUpdate --------------|
//!   |-------- RecoverUpdateAck ---------->|
//!   |<------- RecoverSuccess -------------|
//!
//!   |-------- Rollback ------------------>|
//!   |<------- RollbackAck ----------------|
//! ```

use serde::{Deserialize, Serialize};

use crate::canonical::message_signing_bytes;
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, Sha256Hash};
use crate::error::CoreError;
use crate::log_entry::LogEntry;
use crate::types::SessionId;

/// A message body that can be signed.
pub trait MessageBody: Serialize {
    /// Signing domain, unique per message type.
    const DOMAIN: &'static [u8];

    /// Short name used in errors and logs.
    const NAME: &'static str;

    fn session_id(&self) -> &SessionId;
}

/// A message body together with its sender's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub body: T,
    pub signature: Ed25519Signature,
}

impl<T: MessageBody> Signed<T> {
    /// Sign a body.
    pub fn sign(body: T, keypair: &Keypair) -> Result<Self, CoreError> {
        let signature = keypair.sign(&message_signing_bytes(T::DOMAIN, &body)?);
        Ok(Self { body, signature })
    }

    /// Verify the signature against the expected sender key.
    pub fn verify(&self, sender: &Ed25519PublicKey) -> Result<(), CoreError> {
        sender.verify(&message_signing_bytes(T::DOMAIN, &self.body)?, &self.signature)
    }

    pub fn session_id(&self) -> &SessionId {
        self.body.session_id()
    }
}

/// "Tell me what you know past this watermark."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recover {
    pub session_id: SessionId,
    pub phase: Option<String>,
    pub sequence_number: u64,
    pub last_log_entry_timestamp: i64,
    /// Set when a backup gateway took over the sender's role.
    pub is_backup: bool,
    pub new_base_path: Option<String>,
    pub new_gateway_public_key: Option<Ed25519PublicKey>,
}

impl MessageBody for Recover {
    const DOMAIN: &'static [u8] = b"crossgate/recover/v1";
    const NAME: &'static str = "recover";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// The entries the responder has past the requested watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverUpdate {
    pub session_id: SessionId,
    /// Ascending by timestamp.
    pub recovered_logs: Vec<LogEntry>,
}

impl MessageBody for RecoverUpdate {
    const DOMAIN: &'static [u8] = b"crossgate/recover-update/v1";
    const NAME: &'static str = "recover_update";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Requester's confirmation that it applied a RecoverUpdate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverUpdateAck {
    pub session_id: SessionId,
    pub success: bool,
    /// Hashes of the entries that were new to the requester.
    pub changed_entries_hash: Vec<Sha256Hash>,
}

impl MessageBody for RecoverUpdateAck {
    const DOMAIN: &'static [u8] = b"crossgate/recover-update-ack/v1";
    const NAME: &'static str = "recover_update_ack";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Responder's closing message for a recovery round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverSuccess {
    pub session_id: SessionId,
    pub success: bool,
}

impl MessageBody for RecoverSuccess {
    const DOMAIN: &'static [u8] = b"crossgate/recover-success/v1";
    const NAME: &'static str = "recover_success";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Notice that the sender aborted the transfer and compensated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollback {
    pub session_id: SessionId,
    pub success: bool,
    pub rollback_actions_performed: Vec<String>,
    pub rollback_proofs: Vec<String>,
}

impl MessageBody for Rollback {
    const DOMAIN: &'static [u8] = b"crossgate/rollback/v1";
    const NAME: &'static str = "rollback";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackAck {
    pub session_id: SessionId,
    pub success: bool,
}

impl MessageBody for RollbackAck {
    const DOMAIN: &'static [u8] = b"crossgate/rollback-ack/v1";
    const NAME: &'static str = "rollback_ack";

    fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

pub type RecoverMessage = Signed<Recover>;
pub type RecoverUpdateMessage = Signed<RecoverUpdate>;
pub type RecoverUpdateAckMessage = Signed<RecoverUpdateAck>;
pub type RecoverSuccessMessage = Signed<RecoverSuccess>;
pub type RollbackMessage = Signed<Rollback>;
pub type RollbackAckMessage = Signed<RollbackAck>;

#[cfg(test)]
mod tests {
    use super::*;

    fn recover(ts: i64) -> Recover {
        Recover {
            session_id: SessionId::new("s-1"),
            phase: Some("exec".into()),
            sequence_number: 3,
            last_log_entry_timestamp: ts,
            is_backup: false,
            new_base_path: None,
            new_gateway_public_key: None,
        }
    }

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let msg = RecoverMessage::sign(recover(100), &keypair).unwrap();
        msg.verify(&keypair.public_key()).unwrap();
        assert_eq!(msg.session_id().as_str(), "s-1");
    }

    #[test]
    fn test_signature_over_other_content_fails() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let original = RecoverMessage::sign(recover(100), &keypair).unwrap();

        let mut forged = RecoverMessage::sign(recover(200), &keypair).unwrap();
        forged.signature = original.signature;
        assert!(matches!(
            forged.verify(&keypair.public_key()),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_sender_fails() {
        let msg = RecoverMessage::sign(recover(1), &Keypair::from_seed(&[5; 32])).unwrap();
        assert!(msg.verify(&Keypair::from_seed(&[6; 32]).public_key()).is_err());
    }

    #[test]
    fn test_domains_separate_message_types() {
        // Same field layout, different message type: signature must not carry over.
        let keypair = Keypair::generate();
        let success = RecoverSuccessMessage::sign(
            RecoverSuccess {
                session_id: SessionId::new("s"),
                success: true,
            },
            &keypair,
        )
        .unwrap();
        let ack = RollbackAckMessage {
            body: RollbackAck {
                session_id: SessionId::new("s"),
                success: true,
            },
            signature: success.signature,
        };
        assert!(ack.verify(&keypair.public_key()).is_err());
    }

    #[test]
    fn test_json_wire_roundtrip_keeps_signature_valid() {
        let keypair = Keypair::generate();
        let msg = RecoverMessage::sign(recover(7), &keypair).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        let back: RecoverMessage = serde_json::from_str(&json).unwrap();
        back.verify(&keypair.public_key()).unwrap();
    }
}
