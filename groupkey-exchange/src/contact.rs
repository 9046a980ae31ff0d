// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::Arc;

use groupkey_core::{AccountAddress, Hash, Signature};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::traits::{AccountRecord, Connection, Transport, TransportError};

/// A resolved peer identity together with the connection used to reach it.
///
/// The connection is dialed lazily on the first send and reused for every send afterwards. It is
/// owned exclusively by this contact. On transport failure the contact does not self-heal; the
/// caller is expected to re-resolve and recreate it.
pub struct Contact {
    record: AccountRecord,
    transport: Arc<dyn Transport>,
    connection: Mutex<Option<Box<dyn Connection>>>,
}

impl Contact {
    pub fn new(record: AccountRecord, transport: Arc<dyn Transport>) -> Self {
        Self {
            record,
            transport,
            connection: Mutex::new(None),
        }
    }

    /// The account address of the peer this contact represents.
    pub fn address(&self) -> AccountAddress {
        self.record.address
    }

    /// The peer's display name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The resolved identity record.
    pub fn record(&self) -> &AccountRecord {
        &self.record
    }

    /// Send bytes to the peer, dialing the connection first if none exists yet.
    ///
    /// Failures are surfaced without retry.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut connection = self.connection.lock().await;

        if connection.is_none() {
            debug!(
                "dialing peer {} for account {}",
                self.record.peer_id, self.record.address
            );
            *connection = Some(self.transport.dial(&self.record.peer_id).await?);
        }

        connection
            .as_mut()
            .expect("connection was established above")
            .send(bytes)
            .await
    }

    /// Check that the signature over the given digest was made by the account this contact
    /// represents.
    pub fn verify_signature(&self, digest: &Hash, signature: &Signature) -> bool {
        match signature.recover(digest) {
            Ok(public_key) => public_key.to_address() == self.record.address,
            Err(err) => {
                warn!("could not recover public key from signature: {err}");
                false
            }
        }
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}
