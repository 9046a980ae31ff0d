// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use groupkey_core::AccountAddress;
use thiserror::Error;
use tracing::debug;

use crate::contact::Contact;
use crate::traits::{Ledger, LedgerError, Transport};

/// Read-mostly cache of resolved peer identities.
///
/// Lookups fall through to the ledger on a cache miss. Entries are immutable for the process
/// lifetime; concurrent misses for the same address may resolve twice, which is harmless since
/// the resulting contacts are interchangeable and the last write wins.
pub struct Directory {
    ledger: Arc<dyn Ledger>,
    transport: Arc<dyn Transport>,
    contacts: RwLock<HashMap<AccountAddress, Arc<Contact>>>,
}

impl Directory {
    pub fn new(ledger: Arc<dyn Ledger>, transport: Arc<dyn Transport>) -> Self {
        Self {
            ledger,
            transport,
            contacts: RwLock::new(HashMap::new()),
        }
    }

    /// The contact for the given account, resolved through the ledger if not yet cached.
    pub async fn get(&self, address: AccountAddress) -> Result<Arc<Contact>, DirectoryError> {
        if let Some(contact) = self.read_contacts().get(&address) {
            return Ok(contact.clone());
        }

        debug!("resolving account {address} through the ledger");
        let record = self
            .ledger
            .resolve_account(address)
            .await
            .map_err(|err| DirectoryError::Resolution(address, err))?;

        let contact = Arc::new(Contact::new(record, self.transport.clone()));
        self.write_contacts().insert(address, contact.clone());

        Ok(contact)
    }

    /// Whether a contact for the given account is already cached.
    pub fn contains(&self, address: &AccountAddress) -> bool {
        self.read_contacts().contains_key(address)
    }

    fn read_contacts(&self) -> RwLockReadGuard<'_, HashMap<AccountAddress, Arc<Contact>>> {
        self.contacts.read().expect("poisoned contact cache lock")
    }

    fn write_contacts(&self) -> RwLockWriteGuard<'_, HashMap<AccountAddress, Arc<Contact>>> {
        self.contacts.write().expect("poisoned contact cache lock")
    }
}

/// Error types for directory lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The account could not be resolved through the ledger.
    #[error("could not resolve account {0}: {1}")]
    Resolution(AccountAddress, LedgerError),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use groupkey_core::{AccountAddress, Rng};

    use crate::test_utils::{MemoryLedger, MemoryTransport, account};

    use super::{Directory, DirectoryError};

    #[tokio::test]
    async fn resolves_and_caches() {
        let rng = Rng::from_seed([1; 32]);
        let (_, record) = account(&rng, "alice");
        let address = record.address;

        let ledger = Arc::new(MemoryLedger::new());
        ledger.register_account(record.clone());
        let (transport, _outbox) = MemoryTransport::new();
        let directory = Directory::new(ledger.clone(), transport);

        assert!(!directory.contains(&address));

        let contact = directory.get(address).await.unwrap();
        assert_eq!(contact.record(), &record);
        assert!(directory.contains(&address));

        // Second lookup is served from the cache and returns the same contact.
        let contact_again = directory.get(address).await.unwrap();
        assert!(Arc::ptr_eq(&contact, &contact_again));
        assert_eq!(ledger.resolve_count(), 1);
    }

    #[tokio::test]
    async fn unknown_account_fails() {
        let ledger = Arc::new(MemoryLedger::new());
        let (transport, _outbox) = MemoryTransport::new();
        let directory = Directory::new(ledger, transport);

        let result = directory.get(AccountAddress::from_bytes([9; 20])).await;
        assert!(matches!(result, Err(DirectoryError::Resolution(_, _))));
    }
}
