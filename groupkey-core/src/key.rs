// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric group keys.
//!
//! Every group shares one symmetric key used to encrypt its data. During key rotation a proposed
//! future key exists alongside the current one; both are plain 32-byte secrets and move over the
//! wire in the CBOR representation produced by [`SymmetricKey::to_bytes`].
#[cfg(not(test))]
use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

use crate::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::rng::{Rng, RngError};

/// Size of symmetric group keys.
pub const KEY_LEN: usize = 32;

/// Size of the XChaCha20-Poly1305 nonce prepended to sealed payloads.
pub const NONCE_LEN: usize = 24;

/// 256-bit symmetric group key.
///
/// The key bytes are zeroised on drop, compared in constant time and hidden from debug output.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct SymmetricKey(#[serde(with = "serde_bytes")] [u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a fresh key from the given random-number generator.
    pub fn from_rng(rng: &Rng) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = rng.random_array()?;
        Ok(Self(bytes))
    }

    /// Create a key from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Serialize the key into its CBOR wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyError> {
        Ok(encode_cbor(self)?)
    }

    /// Deserialize a key from its CBOR wire representation.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        Ok(decode_cbor(bytes)?)
    }

    /// Encrypt a payload under this key.
    ///
    /// The random 24-byte nonce is prepended to the returned ciphertext.
    pub fn seal(&self, plaintext: &[u8], rng: &Rng) -> Result<Vec<u8>, KeyError> {
        let nonce: [u8; NONCE_LEN] = rng.random_array()?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.0));
        let mut ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| KeyError::Encryption)?;

        let mut sealed = nonce.to_vec();
        sealed.append(&mut ciphertext);
        Ok(sealed)
    }

    /// Decrypt a payload sealed with [`SymmetricKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, KeyError> {
        if sealed.len() < NONCE_LEN {
            return Err(KeyError::TruncatedCiphertext);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyError::Decryption)
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant-time comparison.
        bool::from(self.0.ct_eq(&other.0))
    }
}

#[cfg(not(test))]
impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not reveal key material when printing debug info.
        f.debug_tuple("SymmetricKey").field(&"***").finish()
    }
}

/// Error types for symmetric key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Failure of the underlying random-number generator.
    #[error(transparent)]
    Rng(#[from] RngError),

    /// Key could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Bytes do not decode into a key.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Sealed payload is shorter than the nonce it must carry.
    #[error("sealed payload is too short to contain a nonce")]
    TruncatedCiphertext,

    /// AEAD encryption failure.
    #[error("could not encrypt payload")]
    Encryption,

    /// Ciphertext did not authenticate under this key.
    #[error("could not authenticate ciphertext")]
    Decryption,
}
