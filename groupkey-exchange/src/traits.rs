// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contracts of the external collaborators the protocol consumes.
//!
//! The ledger stores group membership, account identities and key material; the transport moves
//! bytes between peers. Both are opaque to the session layer, which only relies on the behaviour
//! stated here.

use async_trait::async_trait;
use groupkey_core::{AccountAddress, BoxPublicKey, SymmetricKey};
use thiserror::Error;

/// Identifier under which a peer can be dialed on the transport network.
pub type PeerId = String;

/// Immutable identity record of an account, resolved from the ledger.
///
/// The capability key is only used for sealing file capabilities to the account; message
/// signatures are verified against the account address instead.
#[derive(Clone, Debug, PartialEq)]
pub struct AccountRecord {
    pub address: AccountAddress,
    pub name: String,
    pub peer_id: PeerId,
    pub capability_key: BoxPublicKey,
}

/// Ledger and membership service.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up the identity record of an account.
    async fn resolve_account(&self, address: AccountAddress)
    -> Result<AccountRecord, LedgerError>;

    /// Check whether an account is a current member of a group.
    async fn is_member(
        &self,
        group: AccountAddress,
        account: AccountAddress,
    ) -> Result<(), LedgerError>;

    /// The group's current symmetric key.
    async fn group_key(&self, group: AccountAddress) -> Result<SymmetricKey, LedgerError>;

    /// A proposed future key for the group, identified by the member who proposed it.
    async fn proposed_group_key(
        &self,
        group: AccountAddress,
        proposer: AccountAddress,
    ) -> Result<SymmetricKey, LedgerError>;
}

/// Error types for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No identity record exists for the account.
    #[error("unknown account {0}")]
    UnknownAccount(AccountAddress),

    /// The account is not a current member of the group.
    #[error("account {1} is not a member of group {0}")]
    NotMember(AccountAddress, AccountAddress),

    /// No key material is known for the group.
    #[error("no key material for group {0}")]
    MissingKey(AccountAddress),

    /// No proposed key by the given member is known for the group.
    #[error("no key proposed by {1} for group {0}")]
    MissingProposedKey(AccountAddress, AccountAddress),

    /// Failure of the underlying ledger backend.
    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Point-to-point byte transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a bidirectional byte-stream connection to the given peer.
    async fn dial(&self, peer: &PeerId) -> Result<Box<dyn Connection>, TransportError>;
}

/// One established connection to a peer. Owned exclusively by the [`Contact`] that dialed it.
///
/// [`Contact`]: crate::contact::Contact
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write bytes to the peer. Failures are not retried.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Error types for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer could not be dialed.
    #[error("could not dial peer {0}: {1}")]
    Dial(PeerId, String),

    /// Writing to an established connection failed.
    #[error("could not write to connection: {0}")]
    Write(String),
}
