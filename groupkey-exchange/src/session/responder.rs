// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server role of the key exchange: authorize, challenge, deliver.

use std::sync::Arc;

use async_trait::async_trait;
use groupkey_core::{AccountAddress, Hash, PrivateKey, Rng, Signature};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::contact::Contact;
use crate::envelope::{Envelope, MessageType};
use crate::request::{GroupDataRequest, RequestedData};
use crate::session::{END_OF_SESSION, OnSessionClosed, Session, SessionError, SessionId};
use crate::traits::Ledger;

/// Size of the random challenge a requester must sign to prove its identity.
pub const CHALLENGE_LEN: usize = 32;

/// Responder session driving the two-step verify-membership → challenge → deliver-key exchange.
///
/// - State 0: check that the requester is a current group member; deny before any bytes are sent,
///   otherwise issue a fresh random challenge.
/// - State 1: verify the signature over the exact challenge issued in state 0 and deliver the
///   requested key material. Always terminal.
pub struct GetGroupDataResponder {
    session_id: SessionId,
    sender: AccountAddress,
    contact: Arc<Contact>,
    request: GroupDataRequest,
    challenge: [u8; CHALLENGE_LEN],
    signer: Arc<PrivateKey>,
    ledger: Arc<dyn Ledger>,
    on_closed: OnSessionClosed,
    inner: RwLock<Inner>,
}

struct Inner {
    state: u8,
    error: Option<SessionError>,
}

impl GetGroupDataResponder {
    /// Create a responder session from the validated opening envelope of a new exchange.
    ///
    /// Decodes the [`GroupDataRequest`] the envelope carries and generates this session's
    /// challenge. Challenges are never shared between sessions.
    pub fn new(
        envelope: &Envelope,
        contact: Arc<Contact>,
        sender: AccountAddress,
        signer: Arc<PrivateKey>,
        ledger: Arc<dyn Ledger>,
        rng: &Rng,
        on_closed: OnSessionClosed,
    ) -> Result<Arc<Self>, SessionError> {
        let request = GroupDataRequest::from_bytes(&envelope.payload).map_err(|err| {
            SessionError::Decode(format!("could not decode group data request: {err}"))
        })?;

        let challenge: [u8; CHALLENGE_LEN] = rng
            .random_array()
            .map_err(|err| SessionError::Signing(format!("could not generate challenge: {err}")))?;

        Ok(Arc::new(Self {
            session_id: envelope.session_id,
            sender,
            contact,
            request,
            challenge,
            signer,
            ledger,
            on_closed,
            inner: RwLock::new(Inner {
                state: 0,
                error: None,
            }),
        }))
    }

    fn close(&self, inner: &mut Inner) {
        if inner.state == END_OF_SESSION {
            return;
        }
        inner.state = END_OF_SESSION;
        (self.on_closed)(self.session_id);
    }

    fn fail(&self, inner: &mut Inner, error: SessionError) {
        warn!(
            session_id = self.session_id,
            "responder session failed: {error}"
        );
        inner.error = Some(error);
        self.close(inner);
    }

    async fn send_envelope(&self, payload: Vec<u8>) -> Result<(), SessionError> {
        let envelope = Envelope::new(
            self.sender,
            MessageType::GetGroupData,
            self.session_id,
            payload,
            &self.signer,
        )
        .map_err(|err| SessionError::Signing(err.to_string()))?;

        let bytes = envelope.to_bytes()?;
        self.contact.send(&bytes).await?;

        Ok(())
    }
}

#[async_trait]
impl Session for GetGroupDataResponder {
    fn id(&self) -> SessionId {
        self.session_id
    }

    async fn state(&self) -> u8 {
        self.inner.read().await.state
    }

    async fn is_alive(&self) -> bool {
        self.inner.read().await.state != END_OF_SESSION
    }

    async fn abort(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == END_OF_SESSION {
            return;
        }
        debug!(session_id = self.session_id, "responder session aborted");
        self.close(&mut inner);
    }

    async fn next_state(&self, contact: Option<Arc<Contact>>, data: Option<&[u8]>) {
        let mut inner = self.inner.write().await;

        // Only the requester this session was opened for may drive it.
        if let Some(contact) = &contact {
            if contact.address() != self.contact.address() {
                warn!(
                    session_id = self.session_id,
                    "ignoring envelope from unexpected sender {}",
                    contact.address()
                );
                return;
            }
        }

        match inner.state {
            0 => {
                debug!(
                    session_id = self.session_id,
                    "responder [0] {} --> {}: authorizing for group {}",
                    self.sender,
                    self.contact.address(),
                    self.request.group
                );

                // Membership is checked before a single byte leaves this node, so non-members
                // learn nothing, not even a challenge.
                if let Err(err) = self
                    .ledger
                    .is_member(self.request.group, self.contact.address())
                    .await
                {
                    return self.fail(&mut inner, SessionError::Authorization(err.to_string()));
                }

                match self.send_envelope(self.challenge.to_vec()).await {
                    Ok(()) => inner.state = 1,
                    Err(err) => self.fail(&mut inner, err),
                }
            }
            // Got the challenge proof.
            1 => {
                debug!(
                    session_id = self.session_id,
                    "responder [1] {} --> {}: verifying challenge proof",
                    self.sender,
                    self.contact.address()
                );

                let Some(data) = data else {
                    return self.fail(
                        &mut inner,
                        SessionError::Authentication("missing challenge proof".to_string()),
                    );
                };

                let proof = match Signature::try_from(data) {
                    Ok(proof) => proof,
                    Err(err) => {
                        return self.fail(
                            &mut inner,
                            SessionError::Authentication(format!(
                                "malformed challenge proof: {err}"
                            )),
                        );
                    }
                };

                if !self
                    .contact
                    .verify_signature(&Hash::from_bytes(self.challenge), &proof)
                {
                    return self.fail(
                        &mut inner,
                        SessionError::Authentication(
                            "challenge proof does not match requester".to_string(),
                        ),
                    );
                }

                let key = match self.request.requested {
                    RequestedData::Key => self.ledger.group_key(self.request.group).await,
                    RequestedData::ProposedKey => match self.request.proposer() {
                        Ok(proposer) => {
                            self.ledger
                                .proposed_group_key(self.request.group, proposer)
                                .await
                        }
                        Err(err) => {
                            return self.fail(
                                &mut inner,
                                SessionError::Decode(format!(
                                    "could not parse proposer address: {err}"
                                )),
                            );
                        }
                    },
                };

                let key = match key {
                    Ok(key) => key,
                    Err(err) => return self.fail(&mut inner, SessionError::Ledger(err.to_string())),
                };

                let payload = match key.to_bytes() {
                    Ok(payload) => payload,
                    Err(err) => return self.fail(&mut inner, SessionError::Encode(err.to_string())),
                };

                if let Err(err) = self.send_envelope(payload).await {
                    return self.fail(&mut inner, err);
                }

                debug!(
                    session_id = self.session_id,
                    "responder [1]: key material delivered to {}",
                    self.contact.address()
                );

                // Delivery ends the exchange, success or failure.
                self.close(&mut inner);
            }
            state => {
                error!(
                    session_id = self.session_id,
                    state, "responder cannot advance: session already ended"
                );
            }
        }
    }

    async fn error(&self) -> Option<SessionError> {
        self.inner.read().await.error.clone()
    }
}
