// SPDX-License-Identifier: MIT OR Apache-2.0

//! Account identities anchored in secp256k1 key material.
//!
//! An account is referred to by its [`AccountAddress`], the trailing 20 bytes of the Keccak-256
//! digest of its uncompressed public key. Signatures carry a recovery id, so the signer's address
//! can be derived from a (digest, signature) pair alone and compared against whatever address the
//! sender claims to be — identity is proven by the signature, never by a field.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Hash;
use crate::rng::{Rng, RngError};
use crate::serde::{deserialize_hex, serialize_hex};

/// Size of account addresses.
pub const ADDRESS_LEN: usize = 20;

/// Size of recoverable signatures: `r ‖ s ‖ v`.
pub const SIGNATURE_LEN: usize = 65;

/// Size of capability-box public keys.
pub const BOX_KEY_LEN: usize = 32;

/// 20-byte account address derived from a secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountAddress([u8; ADDRESS_LEN]);

impl AccountAddress {
    /// Create an address from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Bytes of the address.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Convert the address to a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for AccountAddress {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for AccountAddress {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();

        let checked_value: [u8; ADDRESS_LEN] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidAddressLength(value_len, ADDRESS_LEN))?;

        Ok(Self(checked_value))
    }
}

impl FromStr for AccountAddress {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(value)?.as_slice())
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccountAddress").field(&self.to_hex()).finish()
    }
}

impl Serialize for AccountAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

/// secp256k1 signing key of the local account.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Generate a new signing key from the given random-number generator.
    pub fn from_rng(rng: &Rng) -> Result<Self, IdentityError> {
        // Candidate scalars outside the field order are rejected by `from_slice`. The probability
        // of drawing one is negligible but not zero.
        loop {
            let candidate: [u8; 32] = rng.random_array()?;
            if let Ok(key) = SigningKey::from_slice(&candidate) {
                return Ok(Self(key));
            }
        }
    }

    /// Create a signing key from its raw bytes representation.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let key =
            SigningKey::from_slice(bytes).map_err(|_| IdentityError::InvalidPrivateKeyBytes)?;
        Ok(Self(key))
    }

    /// Bytes of the signing key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    /// Derive the verifying key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// The address of this key's account.
    pub fn address(&self) -> AccountAddress {
        self.public_key().to_address()
    }

    /// Sign a 32-byte digest, producing a recoverable signature.
    pub fn sign(&self, digest: &Hash) -> Result<Signature, IdentityError> {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|_| IdentityError::SigningFailed)?;
        Ok(Signature {
            signature,
            recovery_id,
        })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal the secret scalar when printing debug info.
        f.debug_tuple("PrivateKey").field(&"***").finish()
    }
}

/// secp256k1 verifying key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Create a verifying key from SEC1-encoded bytes (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let key =
            VerifyingKey::from_sec1_bytes(bytes).map_err(|_| IdentityError::InvalidPublicKeyBytes)?;
        Ok(Self(key))
    }

    /// Compressed SEC1 bytes of the verifying key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Derive the account address: the trailing 20 bytes of the Keccak-256 digest over the
    /// uncompressed curve point (without the SEC1 prefix byte).
    pub fn to_address(&self) -> AccountAddress {
        let point = self.0.to_encoded_point(false);
        let digest = Hash::new(&point.as_bytes()[1..]);
        let mut address = [0u8; ADDRESS_LEN];
        address.copy_from_slice(&digest.as_bytes()[12..]);
        AccountAddress(address)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&hex::encode(self.to_bytes()))
            .finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        Self::from_sec1_bytes(&bytes)
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

/// Recoverable ECDSA signature over a 32-byte digest.
///
/// The recovery id makes it possible to derive the signer's public key, and from it their account
/// address, from the signature and digest alone.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    signature: EcdsaSignature,
    recovery_id: RecoveryId,
}

impl Signature {
    /// Recover the signer's verifying key from this signature over the given digest.
    pub fn recover(&self, digest: &Hash) -> Result<PublicKey, IdentityError> {
        let key =
            VerifyingKey::recover_from_prehash(digest.as_bytes(), &self.signature, self.recovery_id)
                .map_err(|_| IdentityError::RecoveryFailed)?;
        Ok(PublicKey(key))
    }

    /// Wire representation: `r ‖ s ‖ v`.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&self.signature.to_bytes());
        bytes[64] = self.recovery_id.to_byte();
        bytes
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != SIGNATURE_LEN {
            return Err(IdentityError::InvalidSignatureLength(
                value.len(),
                SIGNATURE_LEN,
            ));
        }

        let signature = EcdsaSignature::from_slice(&value[..64])
            .map_err(|_| IdentityError::InvalidSignatureEncoding)?;
        let recovery_id =
            RecoveryId::from_byte(value[64]).ok_or(IdentityError::InvalidRecoveryId(value[64]))?;

        Ok(Self {
            signature,
            recovery_id,
        })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.to_bytes()))
            .finish()
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.to_bytes(), serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

/// Public key for capability-box operations (sealing file capabilities to an account).
///
/// Carried in resolved identity records. Never used for message signatures.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoxPublicKey([u8; BOX_KEY_LEN]);

impl BoxPublicKey {
    /// Create a box public key from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; BOX_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Bytes of the box public key.
    pub fn as_bytes(&self) -> &[u8; BOX_KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for BoxPublicKey {
    type Error = IdentityError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();

        let checked_value: [u8; BOX_KEY_LEN] = value
            .try_into()
            .map_err(|_| IdentityError::InvalidBoxKeyLength(value_len, BOX_KEY_LEN))?;

        Ok(Self(checked_value))
    }
}

impl fmt::Debug for BoxPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoxPublicKey")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl Serialize for BoxPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialize_hex(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for BoxPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = deserialize_hex(deserializer)?;

        bytes
            .as_slice()
            .try_into()
            .map_err(|err: IdentityError| serde::de::Error::custom(err.to_string()))
    }
}

/// Error types for identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Address bytes have an invalid length.
    #[error("invalid address length {0} bytes, expected {1} bytes")]
    InvalidAddressLength(usize, usize),

    /// Box key bytes have an invalid length.
    #[error("invalid box key length {0} bytes, expected {1} bytes")]
    InvalidBoxKeyLength(usize, usize),

    /// String contains invalid hexadecimal characters.
    #[error("invalid hex encoding")]
    InvalidHexEncoding(#[from] hex::FromHexError),

    /// Bytes do not encode a valid secp256k1 scalar.
    #[error("invalid private key bytes")]
    InvalidPrivateKeyBytes,

    /// Bytes do not encode a valid SEC1 curve point.
    #[error("invalid public key bytes")]
    InvalidPublicKeyBytes,

    /// Signature bytes have an invalid length.
    #[error("invalid signature length {0} bytes, expected {1} bytes")]
    InvalidSignatureLength(usize, usize),

    /// Signature bytes do not encode a valid ECDSA signature.
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    /// Trailing signature byte is not a valid recovery id.
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    /// Local signing failure.
    #[error("could not sign digest")]
    SigningFailed,

    /// No public key could be recovered from the signature.
    #[error("could not recover public key from signature")]
    RecoveryFailed,

    /// Failure of the underlying random-number generator.
    #[error(transparent)]
    Rng(#[from] RngError),
}
