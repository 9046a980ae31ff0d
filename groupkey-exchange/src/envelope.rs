// SPDX-License-Identifier: MIT OR Apache-2.0

//! The signed wire unit exchanged between peers.
//!
//! An envelope binds its sender, type, session id and payload together under one recoverable
//! signature over the canonical digest of those fields. Validation recovers the signer's account
//! address from the signature and rejects the envelope unless it matches both the claimed sender
//! field and the resolved contact's address.

use std::fmt;
use std::sync::Arc;

use groupkey_core::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use groupkey_core::{AccountAddress, Hash, IdentityError, PrivateKey, Signature};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::contact::Contact;
use crate::directory::{Directory, DirectoryError};
use crate::session::SessionId;

/// Type tag of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    GetGroupData = 0,
    AddFile = 1,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::GetGroupData),
            1 => Ok(MessageType::AddFile),
            other => Err(EnvelopeError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::GetGroupData => write!(f, "GetGroupData"),
            MessageType::AddFile => write!(f, "AddFile"),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.as_byte())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let byte = u8::deserialize(deserializer)?;
        MessageType::try_from(byte).map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

/// Signed protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: AccountAddress,
    pub message_type: MessageType,
    pub session_id: SessionId,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub signature: Signature,
}

impl Envelope {
    /// Create a fully formed, ready-to-transmit envelope signed by the given key.
    pub fn new(
        from: AccountAddress,
        message_type: MessageType,
        session_id: SessionId,
        payload: Vec<u8>,
        signer: &PrivateKey,
    ) -> Result<Self, EnvelopeError> {
        let digest = compute_digest(&from, message_type, session_id, &payload);
        let signature = signer.sign(&digest).map_err(EnvelopeError::Signing)?;

        Ok(Self {
            from,
            message_type,
            session_id,
            payload,
            signature,
        })
    }

    /// Canonical digest the signature is computed over:
    /// `Keccak-256(sender ‖ type byte ‖ session id LE ‖ payload)`.
    pub fn digest(&self) -> Hash {
        compute_digest(&self.from, self.message_type, self.session_id, &self.payload)
    }

    /// Serialize the envelope for transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    /// Deserialize an envelope received from transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }

    /// Resolve the sender's contact and prove the envelope was signed by it.
    ///
    /// The signer's address is recovered from the signature alone and must exactly match both the
    /// claimed `from` field and the resolved contact's account address. Any mismatch is a hard
    /// rejection.
    pub async fn validate(&self, directory: &Directory) -> Result<Arc<Contact>, EnvelopeError> {
        let contact = directory.get(self.from).await?;

        let recovered = self
            .signature
            .recover(&self.digest())
            .map_err(EnvelopeError::Recovery)?
            .to_address();

        if recovered != self.from || recovered != contact.address() {
            warn!(
                session_id = self.session_id,
                "rejecting envelope: signature recovers to {recovered}, sender claims {}",
                self.from
            );
            return Err(EnvelopeError::Authentication {
                expected: self.from,
                recovered,
            });
        }

        Ok(contact)
    }
}

fn compute_digest(
    from: &AccountAddress,
    message_type: MessageType,
    session_id: SessionId,
    payload: &[u8],
) -> Hash {
    Hash::digest(&[
        from.as_bytes(),
        &[message_type.as_byte()],
        &session_id.to_le_bytes(),
        payload,
    ])
}

/// Error types for envelope operations.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Byte is not a known message type.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Byte is not a known requested-data variant.
    #[error("unknown requested data variant {0}")]
    UnknownRequestedData(u8),

    /// The envelope digest could not be signed.
    #[error("could not sign envelope digest: {0}")]
    Signing(IdentityError),

    /// The sender's identity could not be resolved.
    #[error(transparent)]
    Resolution(#[from] DirectoryError),

    /// No address could be recovered from the signature.
    #[error("could not recover signer from signature: {0}")]
    Recovery(IdentityError),

    /// The recovered signer address does not match the claimed sender.
    #[error("signature recovers to {recovered}, expected {expected}")]
    Authentication {
        expected: AccountAddress,
        recovered: AccountAddress,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use groupkey_core::{PrivateKey, Rng};

    use crate::directory::Directory;
    use crate::test_utils::{MemoryLedger, MemoryTransport, account};

    use super::{Envelope, EnvelopeError, MessageType};

    #[test]
    fn encode_decode() {
        let rng = Rng::from_seed([1; 32]);
        let private_key = PrivateKey::from_rng(&rng).unwrap();

        let envelope = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            rng.random_u32().unwrap(),
            vec![1, 2, 3, 4],
            &private_key,
        )
        .unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let envelope_again = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope, envelope_again);
    }

    #[test]
    fn message_type_codec() {
        assert_eq!(MessageType::try_from(0).unwrap(), MessageType::GetGroupData);
        assert_eq!(MessageType::try_from(1).unwrap(), MessageType::AddFile);
        assert!(matches!(
            MessageType::try_from(42),
            Err(EnvelopeError::UnknownMessageType(42))
        ));
    }

    fn test_directory(rng: &Rng) -> (PrivateKey, Directory) {
        let (private_key, record) = account(rng, "alice");
        let ledger = Arc::new(MemoryLedger::new());
        ledger.register_account(record);
        let (transport, _outbox) = MemoryTransport::new();
        let directory = Directory::new(ledger, transport);
        (private_key, directory)
    }

    #[tokio::test]
    async fn validate_accepts_genuine_envelope() {
        let rng = Rng::from_seed([2; 32]);
        let (private_key, directory) = test_directory(&rng);

        let envelope = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            7,
            b"payload".to_vec(),
            &private_key,
        )
        .unwrap();

        let contact = envelope.validate(&directory).await.unwrap();
        assert_eq!(contact.address(), private_key.address());
    }

    #[tokio::test]
    async fn validate_rejects_tampered_payload() {
        let rng = Rng::from_seed([3; 32]);
        let (private_key, directory) = test_directory(&rng);

        let mut envelope = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            7,
            b"payload".to_vec(),
            &private_key,
        )
        .unwrap();
        envelope.payload[0] ^= 0x01;

        assert!(envelope.validate(&directory).await.is_err());
    }

    #[tokio::test]
    async fn validate_rejects_tampered_sender() {
        let rng = Rng::from_seed([4; 32]);
        let (private_key, directory) = test_directory(&rng);

        let envelope = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            7,
            b"payload".to_vec(),
            &private_key,
        )
        .unwrap();

        let mut address_bytes = *envelope.from.as_bytes();
        address_bytes[3] ^= 0x01;
        let tampered = Envelope {
            from: groupkey_core::AccountAddress::from_bytes(address_bytes),
            ..envelope
        };

        assert!(tampered.validate(&directory).await.is_err());
    }

    #[tokio::test]
    async fn validate_rejects_tampered_signature() {
        let rng = Rng::from_seed([5; 32]);
        let (private_key, directory) = test_directory(&rng);

        let envelope = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            7,
            b"payload".to_vec(),
            &private_key,
        )
        .unwrap();

        // Flip one bit somewhere in the `s` component of the signature.
        let mut signature_bytes = envelope.signature.to_bytes();
        signature_bytes[40] ^= 0x01;
        match groupkey_core::Signature::try_from(&signature_bytes[..]) {
            Ok(signature) => {
                let tampered = Envelope {
                    signature,
                    ..envelope
                };
                assert!(tampered.validate(&directory).await.is_err());
            }
            // A flipped bit may already make the signature undecodable, which is an equally hard
            // rejection.
            Err(_) => (),
        }
    }

    #[tokio::test]
    async fn validate_rejects_signer_other_than_sender() {
        let rng = Rng::from_seed([6; 32]);
        let (private_key, directory) = test_directory(&rng);
        let other_key = PrivateKey::from_rng(&rng).unwrap();

        // Signed by `other_key` but claiming to come from `private_key`'s account.
        let forged = Envelope::new(
            private_key.address(),
            MessageType::GetGroupData,
            7,
            b"payload".to_vec(),
            &other_key,
        )
        .unwrap();

        assert!(matches!(
            forged.validate(&directory).await,
            Err(EnvelopeError::Authentication { .. })
        ));
    }
}
