//! The signature service: a gateway's signing identity.
//!
//! Log entries are signed over `domain || hash`, recovery messages over
//! `domain || CBOR(body)`. Verification failure is a hard error; callers
//! discard whatever the message carried.

use crossgate_core::{
    CoreError, Ed25519PublicKey, Ed25519Signature, Keypair, LogEntry, LogEntryDraft, MessageBody,
    Signed,
};

use crate::error::{GatewayError, Result};

pub struct SignatureService {
    keypair: Keypair,
}

impl SignatureService {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Sign raw bytes.
    pub fn sign(&self, payload: &[u8]) -> Ed25519Signature {
        self.keypair.sign(payload)
    }

    /// Verify raw bytes against a claimed signer.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: &Ed25519Signature,
        claimed: &Ed25519PublicKey,
    ) -> std::result::Result<(), CoreError> {
        claimed.verify(payload, signature)
    }

    /// Hash and sign a log entry.
    pub fn seal(&self, draft: LogEntryDraft, timestamp: i64) -> LogEntry {
        LogEntry::seal(draft, timestamp, &self.keypair)
    }

    pub fn sign_message<T: MessageBody>(&self, body: T) -> Result<Signed<T>> {
        Ok(Signed::sign(body, &self.keypair)?)
    }

    /// Verify a recovery message against the key of its expected sender.
    pub fn verify_message<T: MessageBody>(
        &self,
        message: &Signed<T>,
        sender: &Ed25519PublicKey,
    ) -> Result<()> {
        message.verify(sender).map_err(|e| match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                GatewayError::InvalidSignature {
                    session_id: message.session_id().clone(),
                    message: T::NAME,
                }
            }
            other => GatewayError::Core(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossgate_core::{RollbackAck, SessionId};

    #[test]
    fn test_sign_verify_payload() {
        let service = SignatureService::new(Keypair::from_seed(&[1; 32]));
        let sig = service.sign(b"payload");
        service.verify(b"payload", &sig, &service.public_key()).unwrap();
        assert!(service.verify(b"other", &sig, &service.public_key()).is_err());
    }

    #[test]
    fn test_message_from_wrong_sender() {
        let alice = SignatureService::new(Keypair::from_seed(&[1; 32]));
        let bob = SignatureService::new(Keypair::from_seed(&[2; 32]));

        let msg = alice
            .sign_message(RollbackAck {
                session_id: SessionId::new("s-9"),
                success: true,
            })
            .unwrap();

        bob.verify_message(&msg, &alice.public_key()).unwrap();
        let err = bob.verify_message(&msg, &bob.public_key()).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidSignature { message: "rollback_ack", .. }
        ));
        assert!(err.to_string().contains("s-9"));
    }

    #[test]
    fn test_sealed_entry_verifies() {
        let service = SignatureService::new(Keypair::generate());
        let entry = service.seal(LogEntryDraft::new(SessionId::new("s"), "init", "start", "{}"), 5);
        assert_eq!(entry.signer_public_key, service.public_key());
        entry.verify().unwrap();
    }
}
