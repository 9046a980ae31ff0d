// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory fakes of the protocol's collaborators, used across unit- and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use groupkey_core::{AccountAddress, BoxPublicKey, PrivateKey, Rng, SymmetricKey};
use tokio::sync::mpsc;

use crate::traits::{
    AccountRecord, Connection, Ledger, LedgerError, PeerId, Transport, TransportError,
};

/// Deterministic test account with a resolvable identity record.
pub fn account(rng: &Rng, name: &str) -> (PrivateKey, AccountRecord) {
    let private_key = PrivateKey::from_rng(rng).expect("rng produces a signing key");
    let capability_key =
        BoxPublicKey::from_bytes(rng.random_array().expect("rng produces key bytes"));

    let record = AccountRecord {
        address: private_key.address(),
        name: name.to_string(),
        peer_id: format!("{name}-peer"),
        capability_key,
    };

    (private_key, record)
}

/// Transport whose connections push every sent frame into one shared outbox channel.
pub struct MemoryTransport {
    outbox: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
    dials: AtomicUsize,
}

impl MemoryTransport {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(PeerId, Vec<u8>)>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                outbox,
                dials: AtomicUsize::new(0),
            }),
            inbox,
        )
    }

    /// Number of connections dialed so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, peer: &PeerId) -> Result<Box<dyn Connection>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            peer: peer.clone(),
            outbox: self.outbox.clone(),
        }))
    }
}

struct MemoryConnection {
    peer: PeerId,
    outbox: mpsc::UnboundedSender<(PeerId, Vec<u8>)>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.outbox
            .send((self.peer.clone(), bytes.to_vec()))
            .map_err(|_| TransportError::Write("outbox closed".to_string()))
    }
}

/// Transport on which every dial fails.
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn dial(&self, peer: &PeerId) -> Result<Box<dyn Connection>, TransportError> {
        Err(TransportError::Dial(
            peer.clone(),
            "transport unavailable".to_string(),
        ))
    }
}

/// Ledger backed by hash maps.
#[derive(Default)]
pub struct MemoryLedger {
    accounts: RwLock<HashMap<AccountAddress, AccountRecord>>,
    members: RwLock<HashMap<AccountAddress, HashSet<AccountAddress>>>,
    keys: RwLock<HashMap<AccountAddress, SymmetricKey>>,
    proposed: RwLock<HashMap<(AccountAddress, AccountAddress), SymmetricKey>>,
    resolves: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_account(&self, record: AccountRecord) {
        self.accounts
            .write()
            .expect("poisoned ledger lock")
            .insert(record.address, record);
    }

    pub fn add_member(&self, group: AccountAddress, account: AccountAddress) {
        self.members
            .write()
            .expect("poisoned ledger lock")
            .entry(group)
            .or_default()
            .insert(account);
    }

    pub fn set_group_key(&self, group: AccountAddress, key: SymmetricKey) {
        self.keys
            .write()
            .expect("poisoned ledger lock")
            .insert(group, key);
    }

    pub fn set_proposed_key(
        &self,
        group: AccountAddress,
        proposer: AccountAddress,
        key: SymmetricKey,
    ) {
        self.proposed
            .write()
            .expect("poisoned ledger lock")
            .insert((group, proposer), key);
    }

    /// Number of account resolutions served so far.
    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn resolve_account(
        &self,
        address: AccountAddress,
    ) -> Result<AccountRecord, LedgerError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .read()
            .expect("poisoned ledger lock")
            .get(&address)
            .cloned()
            .ok_or(LedgerError::UnknownAccount(address))
    }

    async fn is_member(
        &self,
        group: AccountAddress,
        account: AccountAddress,
    ) -> Result<(), LedgerError> {
        let is_member = self
            .members
            .read()
            .expect("poisoned ledger lock")
            .get(&group)
            .is_some_and(|members| members.contains(&account));

        if is_member {
            Ok(())
        } else {
            Err(LedgerError::NotMember(group, account))
        }
    }

    async fn group_key(&self, group: AccountAddress) -> Result<SymmetricKey, LedgerError> {
        self.keys
            .read()
            .expect("poisoned ledger lock")
            .get(&group)
            .cloned()
            .ok_or(LedgerError::MissingKey(group))
    }

    async fn proposed_group_key(
        &self,
        group: AccountAddress,
        proposer: AccountAddress,
    ) -> Result<SymmetricKey, LedgerError> {
        self.proposed
            .read()
            .expect("poisoned ledger lock")
            .get(&(group, proposer))
            .cloned()
            .ok_or(LedgerError::MissingProposedKey(group, proposer))
    }
}
