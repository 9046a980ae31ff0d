// SPDX-License-Identifier: MIT OR Apache-2.0

use groupkey_core::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use groupkey_core::{AccountAddress, IdentityError};
use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeError;

/// Which piece of group data a requester is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestedData {
    /// The group's current symmetric key.
    Key = 0,
    /// A proposed future key, identified by the member who proposed it.
    ProposedKey = 1,
}

impl TryFrom<u8> for RequestedData {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestedData::Key),
            1 => Ok(RequestedData::ProposedKey),
            other => Err(EnvelopeError::UnknownRequestedData(other)),
        }
    }
}

impl Serialize for RequestedData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for RequestedData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let byte = u8::deserialize(deserializer)?;
        RequestedData::try_from(byte).map_err(|err| serde::de::Error::custom(err.to_string()))
    }
}

/// Payload of a requester's opening message: which group, which key variant, and any accessory
/// bytes (the proposer's address when asking for a proposed key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupDataRequest {
    pub group: AccountAddress,
    pub requested: RequestedData,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl GroupDataRequest {
    /// Request the group's current symmetric key.
    pub fn current(group: AccountAddress) -> Self {
        Self {
            group,
            requested: RequestedData::Key,
            payload: Vec::new(),
        }
    }

    /// Request the key proposed by the given member during key rotation.
    pub fn proposed(group: AccountAddress, proposer: AccountAddress) -> Self {
        Self {
            group,
            requested: RequestedData::ProposedKey,
            payload: proposer.as_bytes().to_vec(),
        }
    }

    /// The proposer address carried in the accessory payload.
    pub fn proposer(&self) -> Result<AccountAddress, IdentityError> {
        AccountAddress::try_from(self.payload.as_slice())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}
