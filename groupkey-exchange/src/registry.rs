// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bookkeeping for live sessions and demultiplexing of inbound envelopes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use groupkey_core::cbor::DecodeError;
use groupkey_core::{AccountAddress, PrivateKey, Rng};
use thiserror::Error;
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::envelope::{Envelope, EnvelopeError, MessageType};
use crate::session::responder::GetGroupDataResponder;
use crate::session::{OnSessionClosed, Session, SessionError, SessionId};
use crate::traits::Ledger;

/// Owns the map from session id to live session and routes inbound envelopes.
///
/// Sessions are registered under their id and evicted exactly once, through the close callback
/// handed to them at construction — closing is the single removal path, so an id never outlives
/// its session and an aborted session cannot leak.
pub struct SessionRegistry {
    local: AccountAddress,
    signer: Arc<PrivateKey>,
    ledger: Arc<dyn Ledger>,
    directory: Arc<Directory>,
    rng: Arc<Rng>,
    sessions: RwLock<HashMap<SessionId, Arc<dyn Session>>>,
}

impl SessionRegistry {
    pub fn new(
        local: AccountAddress,
        signer: Arc<PrivateKey>,
        ledger: Arc<dyn Ledger>,
        directory: Arc<Directory>,
        rng: Arc<Rng>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            signer,
            ledger,
            directory,
            rng,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// The close callback to hand to sessions routed by this registry.
    pub fn closer(self: &Arc<Self>) -> OnSessionClosed {
        let registry = Arc::downgrade(self);
        Arc::new(move |session_id| {
            if let Some(registry) = registry.upgrade() {
                registry.evict(session_id);
            }
        })
    }

    /// Track a session under its id.
    pub fn register(&self, session: Arc<dyn Session>) {
        let session_id = session.id();
        if self.write_sessions().insert(session_id, session).is_some() {
            warn!(session_id, "replaced an existing session with the same id");
        }
    }

    /// The live session with the given id, if any.
    pub fn session(&self, session_id: SessionId) -> Option<Arc<dyn Session>> {
        self.read_sessions().get(&session_id).cloned()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_sessions().is_empty()
    }

    /// Decode, validate and route one inbound envelope.
    ///
    /// The payload goes to the live session with the envelope's session id. An unknown id on a
    /// `GetGroupData` envelope opens a new responder session; any other type cannot initiate an
    /// exchange here.
    pub async fn dispatch(self: &Arc<Self>, raw: &[u8]) -> Result<(), DispatchError> {
        let envelope = Envelope::from_bytes(raw)?;
        let contact = envelope.validate(&self.directory).await?;

        let session = self.session(envelope.session_id);
        match session {
            Some(session) => {
                session
                    .next_state(Some(contact), Some(&envelope.payload))
                    .await;
                Ok(())
            }
            None => match envelope.message_type {
                MessageType::GetGroupData => {
                    debug!(
                        session_id = envelope.session_id,
                        "opening responder session for {}",
                        contact.address()
                    );

                    let responder = GetGroupDataResponder::new(
                        &envelope,
                        contact,
                        self.local,
                        self.signer.clone(),
                        self.ledger.clone(),
                        &self.rng,
                        self.closer(),
                    )?;

                    self.register(responder.clone());
                    responder.run().await;
                    Ok(())
                }
                other => Err(DispatchError::UnexpectedInitiator(other)),
            },
        }
    }

    fn evict(&self, session_id: SessionId) {
        debug!(session_id, "evicting closed session");
        self.write_sessions().remove(&session_id);
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<dyn Session>>> {
        self.sessions.read().expect("poisoned session map lock")
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<dyn Session>>> {
        self.sessions.write().expect("poisoned session map lock")
    }
}

/// Error types for envelope dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Inbound bytes do not decode into an envelope.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The envelope failed validation.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A responder session could not be opened for the envelope.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The envelope type cannot open a new session.
    #[error("{0} envelopes cannot open a session")]
    UnexpectedInitiator(MessageType),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use groupkey_core::{PrivateKey, Rng};

    use crate::directory::Directory;
    use crate::envelope::{Envelope, MessageType};
    use crate::request::GroupDataRequest;
    use crate::session::Session;
    use crate::session::requester::GetGroupDataRequester;
    use crate::test_utils::{MemoryLedger, MemoryTransport, account};

    use super::{DispatchError, SessionRegistry};

    fn registry_fixture(rng: &Rng) -> (Arc<PrivateKey>, Arc<SessionRegistry>, Arc<MemoryLedger>) {
        let (private_key, record) = account(rng, "alice");
        let private_key = Arc::new(private_key);

        let ledger = Arc::new(MemoryLedger::new());
        ledger.register_account(record);

        let (transport, _outbox) = MemoryTransport::new();
        let directory = Arc::new(Directory::new(ledger.clone(), transport));

        let registry = SessionRegistry::new(
            private_key.address(),
            private_key.clone(),
            ledger.clone(),
            directory,
            Arc::new(Rng::from_seed([99; 32])),
        );

        (private_key, registry, ledger)
    }

    #[tokio::test]
    async fn sessions_with_distinct_ids_coexist() {
        let rng = Rng::from_seed([1; 32]);
        let (private_key, registry, ledger) = registry_fixture(&rng);

        let (_, peer_record) = account(&rng, "bob");
        ledger.register_account(peer_record.clone());
        let (peer_transport, _outbox) = MemoryTransport::new();
        let peer_contact = Arc::new(crate::contact::Contact::new(peer_record, peer_transport));

        let group = groupkey_core::AccountAddress::from_bytes([5; 20]);

        let (session_1, _delivery_1) = GetGroupDataRequester::new(
            GroupDataRequest::current(group),
            peer_contact.clone(),
            private_key.address(),
            private_key.clone(),
            &rng,
            registry.closer(),
        )
        .unwrap();
        let (session_2, _delivery_2) = GetGroupDataRequester::new(
            GroupDataRequest::current(group),
            peer_contact,
            private_key.address(),
            private_key.clone(),
            &rng,
            registry.closer(),
        )
        .unwrap();

        assert_ne!(session_1.id(), session_2.id());

        registry.register(session_1.clone());
        registry.register(session_2.clone());
        assert_eq!(registry.len(), 2);

        // Each id routes to its own session.
        assert_eq!(
            registry.session(session_1.id()).unwrap().id(),
            session_1.id()
        );
        assert_eq!(
            registry.session(session_2.id()).unwrap().id(),
            session_2.id()
        );

        session_1.abort().await;
        session_2.abort().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn closing_evicts_exactly_once() {
        let rng = Rng::from_seed([2; 32]);
        let (private_key, registry, ledger) = registry_fixture(&rng);

        let (_, peer_record) = account(&rng, "bob");
        ledger.register_account(peer_record.clone());
        let (peer_transport, _outbox) = MemoryTransport::new();
        let peer_contact = Arc::new(crate::contact::Contact::new(peer_record, peer_transport));

        let group = groupkey_core::AccountAddress::from_bytes([5; 20]);
        let (session, _delivery) = GetGroupDataRequester::new(
            GroupDataRequest::current(group),
            peer_contact,
            private_key.address(),
            private_key.clone(),
            &rng,
            registry.closer(),
        )
        .unwrap();

        registry.register(session.clone());
        assert_eq!(registry.len(), 1);

        session.abort().await;
        assert!(registry.is_empty());

        // A second abort is a no-op.
        session.abort().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn add_file_envelope_cannot_initiate() {
        let rng = Rng::from_seed([3; 32]);
        let (private_key, registry, _ledger) = registry_fixture(&rng);

        let envelope = Envelope::new(
            private_key.address(),
            MessageType::AddFile,
            41,
            b"irrelevant".to_vec(),
            &private_key,
        )
        .unwrap();

        let result = registry.dispatch(&envelope.to_bytes().unwrap()).await;
        assert!(matches!(
            result,
            Err(DispatchError::UnexpectedInitiator(MessageType::AddFile))
        ));
        assert!(registry.is_empty());
    }
}
