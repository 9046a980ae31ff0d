// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full exchanges between a requester and a responder node, wired together through in-memory
//! transports and a shared ledger.

use std::sync::Arc;

use groupkey_core::{AccountAddress, PrivateKey, Rng, SymmetricKey};
use groupkey_exchange::test_utils::{MemoryLedger, MemoryTransport, account};
use groupkey_exchange::{
    Directory, Envelope, GetGroupDataRequester, GroupDataRequest, PeerId, Session, SessionRegistry,
};
use tokio::sync::mpsc;

struct Node {
    private_key: Arc<PrivateKey>,
    registry: Arc<SessionRegistry>,
    directory: Arc<Directory>,
    outbox: mpsc::UnboundedReceiver<(PeerId, Vec<u8>)>,
}

fn node(name: &str, seed: u8, ledger: &Arc<MemoryLedger>) -> Node {
    let rng = Rng::from_seed([seed; 32]);
    let (private_key, record) = account(&rng, name);
    let private_key = Arc::new(private_key);
    ledger.register_account(record);

    let (transport, outbox) = MemoryTransport::new();
    let directory = Arc::new(Directory::new(ledger.clone(), transport));
    let registry = SessionRegistry::new(
        private_key.address(),
        private_key.clone(),
        ledger.clone(),
        directory.clone(),
        Arc::new(Rng::from_seed([seed.wrapping_add(100); 32])),
    );

    Node {
        private_key,
        registry,
        directory,
        outbox,
    }
}

/// Shuttle frames between the two nodes until neither has anything left to send.
async fn pump(requester: &mut Node, responder: &mut Node) {
    loop {
        let mut progressed = false;

        while let Ok((_, frame)) = requester.outbox.try_recv() {
            responder.registry.dispatch(&frame).await.unwrap();
            progressed = true;
        }
        while let Ok((_, frame)) = responder.outbox.try_recv() {
            requester.registry.dispatch(&frame).await.unwrap();
            progressed = true;
        }

        if !progressed {
            break;
        }
    }
}

#[tokio::test]
async fn current_group_key_exchange() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut alice = node("alice", 1, &ledger);
    let mut bob = node("bob", 2, &ledger);

    let group = AccountAddress::from_bytes([5; 20]);
    let group_key = SymmetricKey::from_bytes([42; 32]);
    ledger.add_member(group, alice.private_key.address());
    ledger.add_member(group, bob.private_key.address());
    ledger.set_group_key(group, group_key.clone());

    let bob_contact = alice.directory.get(bob.private_key.address()).await.unwrap();
    let rng = Rng::from_seed([7; 32]);

    let (session, delivery) = GetGroupDataRequester::new(
        GroupDataRequest::current(group),
        bob_contact,
        alice.private_key.address(),
        alice.private_key.clone(),
        &rng,
        alice.registry.closer(),
    )
    .unwrap();
    alice.registry.register(session.clone());
    session.run().await;

    pump(&mut alice, &mut bob).await;

    let (recipient, key) = delivery.await.unwrap();
    assert_eq!(recipient, group);
    assert_eq!(key, group_key);

    assert!(!session.is_alive().await);
    assert_eq!(session.error().await, None);

    // Both registries reclaimed their closed sessions.
    assert!(alice.registry.is_empty());
    assert!(bob.registry.is_empty());
}

#[tokio::test]
async fn proposed_group_key_exchange() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut alice = node("alice", 3, &ledger);
    let mut bob = node("bob", 4, &ledger);

    let group = AccountAddress::from_bytes([5; 20]);
    let proposer = AccountAddress::from_bytes([6; 20]);
    let proposed_key = SymmetricKey::from_bytes([43; 32]);
    ledger.add_member(group, alice.private_key.address());
    ledger.add_member(group, bob.private_key.address());
    ledger.set_proposed_key(group, proposer, proposed_key.clone());

    let bob_contact = alice.directory.get(bob.private_key.address()).await.unwrap();
    let rng = Rng::from_seed([8; 32]);

    let (session, delivery) = GetGroupDataRequester::new(
        GroupDataRequest::proposed(group, proposer),
        bob_contact,
        alice.private_key.address(),
        alice.private_key.clone(),
        &rng,
        alice.registry.closer(),
    )
    .unwrap();
    alice.registry.register(session.clone());
    session.run().await;

    pump(&mut alice, &mut bob).await;

    let (recipient, key) = delivery.await.unwrap();
    assert_eq!(recipient, proposer);
    assert_eq!(key, proposed_key);

    assert_eq!(session.error().await, None);
    assert!(alice.registry.is_empty());
    assert!(bob.registry.is_empty());
}

#[tokio::test]
async fn non_member_request_is_denied_end_to_end() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut alice = node("alice", 5, &ledger);
    let mut bob = node("bob", 6, &ledger);

    let group = AccountAddress::from_bytes([5; 20]);
    // Bob holds the key but alice is not a member.
    ledger.add_member(group, bob.private_key.address());
    ledger.set_group_key(group, SymmetricKey::from_bytes([44; 32]));

    let bob_contact = alice.directory.get(bob.private_key.address()).await.unwrap();
    let rng = Rng::from_seed([9; 32]);

    let (session, delivery) = GetGroupDataRequester::new(
        GroupDataRequest::current(group),
        bob_contact,
        alice.private_key.address(),
        alice.private_key.clone(),
        &rng,
        alice.registry.closer(),
    )
    .unwrap();
    alice.registry.register(session.clone());
    session.run().await;

    pump(&mut alice, &mut bob).await;

    // The responder denied before sending anything, so no reply ever arrives. The requester side
    // stays parked in its waiting state until aborted.
    assert!(bob.registry.is_empty());
    assert!(session.is_alive().await);
    assert_eq!(session.state().await, 1);

    session.abort().await;
    assert!(delivery.await.is_err());
    assert!(alice.registry.is_empty());
}

#[tokio::test]
async fn tampered_frame_is_rejected_at_dispatch() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut alice = node("alice", 7, &ledger);
    let bob = node("bob", 8, &ledger);

    let group = AccountAddress::from_bytes([5; 20]);
    ledger.add_member(group, alice.private_key.address());
    ledger.add_member(group, bob.private_key.address());
    ledger.set_group_key(group, SymmetricKey::from_bytes([44; 32]));

    let bob_contact = alice.directory.get(bob.private_key.address()).await.unwrap();
    let rng = Rng::from_seed([10; 32]);

    let (session, _delivery) = GetGroupDataRequester::new(
        GroupDataRequest::current(group),
        bob_contact,
        alice.private_key.address(),
        alice.private_key.clone(),
        &rng,
        alice.registry.closer(),
    )
    .unwrap();
    alice.registry.register(session.clone());
    session.run().await;

    // Corrupt the request payload in flight. The signature no longer covers the bytes, so bob's
    // registry must reject the frame and open no session.
    let (_, frame) = alice.outbox.try_recv().unwrap();
    let mut envelope = Envelope::from_bytes(&frame).unwrap();
    envelope.payload[0] ^= 0x01;

    let result = bob.registry.dispatch(&envelope.to_bytes().unwrap()).await;
    assert!(result.is_err());
    assert!(bob.registry.is_empty());
}
