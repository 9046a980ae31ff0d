// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared shape of every protocol exchange.
//!
//! A session is one stateful instance of the request/response protocol: a monotonically advancing
//! state driven by inbound data, a stable random id used to correlate request/response pairs, and
//! a terminal error slot. Sessions never block waiting for a reply; [`Session::next_state`]
//! returns once the outbound message is sent and the next inbound envelope for the same id is
//! what advances the machine again.

pub mod requester;
pub mod responder;

use std::sync::Arc;

use async_trait::async_trait;
use groupkey_core::cbor::{DecodeError, EncodeError};
use thiserror::Error;

use crate::contact::Contact;
use crate::traits::TransportError;

/// Random 32-bit identifier correlating the messages of one exchange.
///
/// Chosen by the initiator. Only needs to be unique enough for correlation; the challenge is the
/// security token.
pub type SessionId = u32;

/// Reserved terminal state: no further transitions are valid.
pub const END_OF_SESSION: u8 = u8::MAX;

/// Invoked exactly once when a session closes, however it closes. This is how the registry learns
/// to stop routing envelopes to the session's id.
pub type OnSessionClosed = Arc<dyn Fn(SessionId) + Send + Sync>;

/// One stateful instance of the request/response protocol.
///
/// Transitions are strictly sequential: `next_state` holds the session's write lock for the full
/// duration of a transition, while `state`, `is_alive` and `error` only take the read lock and
/// can be queried concurrently. `abort` is safe to call from another task at any time.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stable identifier of this session.
    fn id(&self) -> SessionId;

    /// Current state.
    async fn state(&self) -> u8;

    /// False exactly when the session has ended.
    async fn is_alive(&self) -> bool;

    /// Force-close a still-alive session without completing the protocol. Idempotent.
    async fn abort(&self);

    /// Advance the state machine with inbound data.
    ///
    /// `contact` is the validated sender of the envelope that carried `data`, when there was one.
    /// Calling this on an ended session logs an error and performs no action.
    async fn next_state(&self, contact: Option<Arc<Contact>>, data: Option<&[u8]>);

    /// Perform the session's state-0 action. Used by the initiator to kick off a session it just
    /// created.
    async fn run(&self) {
        self.next_state(None, None).await;
    }

    /// The error that ended the session, if any.
    async fn error(&self) -> Option<SessionError>;
}

/// Error that ended a session.
///
/// All of these are fatal to the session and never retried internally: retrying requires fresh
/// randomness (challenge, session id) and therefore a new session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A value could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Malformed envelope payload or key material.
    #[error("decode error: {0}")]
    Decode(String),

    /// Send or dial failure. The caller may start a fresh session.
    #[error("transport error: {0}")]
    Transport(String),

    /// A signature did not recover to the claimed or expected address.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The requesting account is not a current member of the group.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Local signing or challenge-generation failure.
    #[error("signing error: {0}")]
    Signing(String),

    /// The ledger collaborator failed to produce requested data.
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl From<EncodeError> for SessionError {
    fn from(value: EncodeError) -> Self {
        SessionError::Encode(value.to_string())
    }
}

impl From<DecodeError> for SessionError {
    fn from(value: DecodeError) -> Self {
        SessionError::Decode(value.to_string())
    }
}

impl From<TransportError> for SessionError {
    fn from(value: TransportError) -> Self {
        SessionError::Transport(value.to_string())
    }
}
