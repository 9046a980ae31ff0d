// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticated sessions for retrieving a group's shared symmetric key from a peer who already
//! holds it.
//!
//! A requester opens a session against a responder and proves control over its claimed account by
//! signing a random challenge; only then does the responder hand over key material. Both roles
//! are small state machines driven by inbound signed [`Envelope`]s, routed to them by a
//! [`SessionRegistry`]. Identities are anchored in recoverable signatures: every envelope proves
//! who sent it, independent of what the sender claims.

pub mod contact;
pub mod directory;
pub mod envelope;
pub mod registry;
pub mod request;
pub mod session;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;

pub use contact::Contact;
pub use directory::{Directory, DirectoryError};
pub use envelope::{Envelope, EnvelopeError, MessageType};
pub use registry::{DispatchError, SessionRegistry};
pub use request::{GroupDataRequest, RequestedData};
pub use session::requester::{DeliveredKey, GetGroupDataRequester};
pub use session::responder::{CHALLENGE_LEN, GetGroupDataResponder};
pub use session::{END_OF_SESSION, OnSessionClosed, Session, SessionError, SessionId};
pub use traits::{
    AccountRecord, Connection, Ledger, LedgerError, PeerId, Transport, TransportError,
};
