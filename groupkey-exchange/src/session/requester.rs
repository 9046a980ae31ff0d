// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client role of the key exchange: request, prove identity, receive key.

use std::sync::Arc;

use async_trait::async_trait;
use groupkey_core::{AccountAddress, Hash, PrivateKey, Rng, RngError, SymmetricKey};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, error, warn};

use crate::contact::Contact;
use crate::envelope::{Envelope, MessageType};
use crate::request::{GroupDataRequest, RequestedData};
use crate::session::{END_OF_SESSION, OnSessionClosed, Session, SessionError, SessionId};

/// What a successful exchange delivers: the address the key belongs to (the group for a current
/// key, the proposer for a proposed key) and the key itself.
pub type DeliveredKey = (AccountAddress, SymmetricKey);

/// Requester session driving the three-step request → prove → receive-key exchange.
///
/// - State 0: send the signed [`GroupDataRequest`] envelope.
/// - State 1: sign the responder's challenge and send the proof.
/// - State 2: decode the delivered key and complete the exchange. Always terminal.
pub struct GetGroupDataRequester {
    session_id: SessionId,
    sender: AccountAddress,
    receiver: Arc<Contact>,
    request: GroupDataRequest,
    signer: Arc<PrivateKey>,
    on_closed: OnSessionClosed,
    inner: RwLock<Inner>,
}

struct Inner {
    state: u8,
    error: Option<SessionError>,
    delivery: Option<oneshot::Sender<DeliveredKey>>,
}

impl GetGroupDataRequester {
    /// Create a requester session against the given peer.
    ///
    /// Returns the session and the completion handle on which the delivered key arrives. If the
    /// session ends without success the sender side is dropped and the handle resolves to an
    /// error; inspect [`Session::error`] for the cause.
    pub fn new(
        request: GroupDataRequest,
        receiver: Arc<Contact>,
        sender: AccountAddress,
        signer: Arc<PrivateKey>,
        rng: &Rng,
        on_closed: OnSessionClosed,
    ) -> Result<(Arc<Self>, oneshot::Receiver<DeliveredKey>), RngError> {
        let (delivery_tx, delivery_rx) = oneshot::channel();

        let session = Arc::new(Self {
            session_id: rng.random_u32()?,
            sender,
            receiver,
            request,
            signer,
            on_closed,
            inner: RwLock::new(Inner {
                state: 0,
                error: None,
                delivery: Some(delivery_tx),
            }),
        });

        Ok((session, delivery_rx))
    }

    fn close(&self, inner: &mut Inner) {
        if inner.state == END_OF_SESSION {
            return;
        }
        inner.state = END_OF_SESSION;
        // Dropping the sender signals failure to whoever awaits delivery.
        inner.delivery.take();
        (self.on_closed)(self.session_id);
    }

    fn fail(&self, inner: &mut Inner, error: SessionError) {
        warn!(
            session_id = self.session_id,
            "requester session failed: {error}"
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
        self.receiver.send(&bytes).await?;

        Ok(())
    }
}

#[async_trait]
impl Session for GetGroupDataRequester {
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
        debug!(session_id = self.session_id, "requester session aborted");
        self.close(&mut inner);
    }

    async fn next_state(&self, contact: Option<Arc<Contact>>, data: Option<&[u8]>) {
        let mut inner = self.inner.write().await;

        // Replies must come from the peer this session was opened against. Anything else is
        // dropped without advancing the machine.
        if let Some(contact) = &contact {
            if contact.address() != self.receiver.address() {
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
                    "requester [0] {} --> {}: requesting group data",
                    self.sender,
                    self.receiver.address()
                );

                let payload = match self.request.to_bytes() {
                    Ok(payload) => payload,
                    Err(err) => return self.fail(&mut inner, err.into()),
                };

                match self.send_envelope(payload).await {
                    Ok(()) => inner.state = 1,
                    Err(err) => self.fail(&mut inner, err),
                }
            }
            // Got the challenge.
            1 => {
                debug!(
                    session_id = self.session_id,
                    "requester [1] {} --> {}: proving identity",
                    self.sender,
                    self.receiver.address()
                );

                let challenge = match data {
                    Some(data) => match Hash::try_from(data) {
                        Ok(challenge) => challenge,
                        Err(err) => {
                            return self.fail(
                                &mut inner,
                                SessionError::Decode(format!("malformed challenge: {err}")),
                            );
                        }
                    },
                    None => {
                        return self.fail(
                            &mut inner,
                            SessionError::Decode("missing challenge payload".to_string()),
                        );
                    }
                };

                let proof = match self.signer.sign(&challenge) {
                    Ok(signature) => signature,
                    Err(err) => {
                        return self.fail(&mut inner, SessionError::Signing(err.to_string()));
                    }
                };

                match self.send_envelope(proof.to_bytes().to_vec()).await {
                    Ok(()) => inner.state = 2,
                    Err(err) => self.fail(&mut inner, err),
                }
            }
            // Got the key material.
            2 => {
                let Some(data) = data else {
                    return self.fail(
                        &mut inner,
                        SessionError::Decode("missing key payload".to_string()),
                    );
                };

                let key = match SymmetricKey::try_from_bytes(data) {
                    Ok(key) => key,
                    Err(err) => {
                        return self.fail(
                            &mut inner,
                            SessionError::Decode(format!("could not decode group key: {err}")),
                        );
                    }
                };

                let recipient = match self.request.requested {
                    RequestedData::Key => self.request.group,
                    RequestedData::ProposedKey => match self.request.proposer() {
                        Ok(proposer) => proposer,
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

                debug!(
                    session_id = self.session_id,
                    "requester [2]: received key for {recipient}"
                );

                if let Some(delivery) = inner.delivery.take() {
                    // The caller may have dropped the receiving end; nothing left to do then.
                    let _ = delivery.send((recipient, key));
                }

                self.close(&mut inner);
            }
            state => {
                error!(
                    session_id = self.session_id,
                    state, "requester cannot advance: session already ended"
                );
            }
        }
    }

    async fn error(&self) -> Option<SessionError> {
        self.inner.read().await.error.clone()
    }
}
