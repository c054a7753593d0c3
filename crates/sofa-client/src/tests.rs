//! End-to-end scenarios over an in-memory ledger and loopback transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use sofa_net::{
    ChainClient, ChainError, InboundPayload, LoopbackHub, LoopbackTransport, MemoryChain,
    ObservedTransaction, SecureTransport, TxReceipt, TxStatus,
};
use sofa_shared::sofa::{Payment, PaymentRequest, PaymentStatus, RequestState};
use sofa_shared::transaction::{SignedTransaction, UnsignedTransaction};
use sofa_shared::{Address, Kind, MessageId, PeerId, Sofa, ThreadId, TxHash, Wallet};
use sofa_store::{ChatMessage, ConversationChange, Database, PendingEvent, SendState};

use crate::{ClientConfig, ClientError, ExternalOutcome, ExternalPaymentEvent, SofaClient};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    client: SofaClient,
    chain: MemoryChain,
    hub: LoopbackHub,
    address: Address,
    bob: LoopbackTransport,
    bob_inbox: mpsc::Receiver<InboundPayload>,
    bob_address: Address,
}

fn peer(name: &str) -> PeerId {
    PeerId::new(name).unwrap()
}

fn bob_thread() -> ThreadId {
    ThreadId::peer(&peer("bob"))
}

async fn harness(funds: u128) -> Harness {
    harness_with(funds, ClientConfig::default()).await
}

async fn harness_with(funds: u128, config: ClientConfig) -> Harness {
    let chain = MemoryChain::new();
    let hub = LoopbackHub::new();
    let (transport, inbox) = hub.connect(peer("alice"));
    let (bob, bob_inbox) = hub.connect(peer("bob"));

    let config = ClientConfig {
        // Tests drive reconciliation by hand.
        poll_interval: Duration::from_secs(3600),
        ..config
    };
    let client = SofaClient::with_database(
        config,
        Database::open_in_memory().unwrap(),
        Arc::new(chain.clone()),
        Arc::new(transport),
        inbox,
    );

    let wallet = Wallet::generate();
    chain.credit(wallet.address(), funds).await;
    let address = client.unlock_wallet(wallet).await.unwrap();

    let bob_address = Wallet::generate().address().clone();
    client
        .contacts()
        .upsert(peer("bob"), bob_address.clone(), "en".into())
        .unwrap();

    Harness {
        client,
        chain,
        hub,
        address,
        bob,
        bob_inbox,
        bob_address,
    }
}

/// Ledger whose submissions wait for a gate permit.
struct GatedChain {
    inner: MemoryChain,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ChainClient for GatedChain {
    async fn balance(&self, address: &Address) -> Result<u128, ChainError> {
        self.inner.balance(address).await
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TxReceipt, ChainError> {
        let _permit = self.gate.acquire().await;
        self.inner.submit(tx).await
    }

    async fn status(&self, hash: &TxHash) -> Result<TxStatus, ChainError> {
        self.inner.status(hash).await
    }

    async fn transaction(&self, hash: &TxHash) -> Result<ObservedTransaction, ChainError> {
        self.inner.transaction(hash).await
    }

    async fn history(&self, address: &Address) -> Result<Vec<ObservedTransaction>, ChainError> {
        self.inner.history(address).await
    }

    async fn watch(
        &self,
        address: &Address,
    ) -> Result<mpsc::Receiver<ObservedTransaction>, ChainError> {
        self.inner.watch(address).await
    }
}

/// Store a pending outgoing payment for a hash the ledger never saw.
fn track_unknown_payment(h: &Harness) -> (TxHash, ChatMessage) {
    let hash = TxHash::from_bytes(&[9u8; 32]);
    let mut payment = Payment::new(3, h.address.clone(), h.bob_address.clone());
    payment.tx_hash = Some(hash.clone());
    let mut message = ChatMessage::outgoing(peer("alice"), &Sofa::Payment(payment))
        .unwrap()
        .with_id(MessageId::from(&hash));
    message.mark(SendState::Pending, None);
    h.client.conversations().append(&bob_thread(), &message).unwrap();
    h.client
        .pending()
        .register(hash.clone(), bob_thread(), message.clone())
        .unwrap();
    (hash, message)
}

fn hash_of(message: &ChatMessage) -> TxHash {
    TxHash::parse(message.id.as_str()).unwrap()
}

fn payment_of(message: &ChatMessage) -> Payment {
    match message.sofa().unwrap() {
        Sofa::Payment(payment) => payment,
        other => panic!("expected a payment, got {other:?}"),
    }
}

#[tokio::test]
async fn test_payment_pending_then_sent_on_confirmation() {
    let mut h = harness(100).await;

    let message = h.client.send_payment(&peer("bob"), 15).await.unwrap();
    let hash = hash_of(&message);

    assert_eq!(message.kind, Kind::Payment);
    assert_eq!(message.state, SendState::Pending);
    assert!(h.client.pending().contains(&hash).unwrap());
    let stored = h.client.conversations().messages(&bob_thread()).unwrap();
    assert_eq!(stored, vec![message.clone()]);

    let payment = payment_of(&message);
    assert_eq!(payment.value, 15);
    assert_eq!(payment.from_address, h.address);
    assert_eq!(payment.to_address, h.bob_address);
    assert_eq!(payment.tx_hash, Some(hash.clone()));

    // The recipient is told about the payment right away.
    let inbound = tokio::time::timeout(WAIT, h.bob_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(inbound.payload.starts_with("SOFA::Payment:"));

    let report = h.client.reconcile_now().await;
    assert_eq!(report.pending, 1);

    h.chain.confirm(&hash).await.unwrap();
    let report = h.client.reconcile_now().await;
    assert_eq!(report.confirmed, 1);

    let (_, settled) = h.client.conversations().get_message(&message.id).unwrap().unwrap();
    assert_eq!(settled.state, SendState::Sent);
    assert_eq!(payment_of(&settled).status, PaymentStatus::Confirmed);
    assert!(!h.client.pending().contains(&hash).unwrap());
}

#[tokio::test]
async fn test_rejected_submission_fails_message_and_resend_keeps_identity() {
    let h = harness(100).await;
    h.chain.reject_next("nonce too low").await;

    let err = h.client.send_payment(&peer("bob"), 10).await.unwrap_err();
    assert!(matches!(err, ClientError::Submission(_)));

    let stored = h.client.conversations().messages(&bob_thread()).unwrap();
    assert_eq!(stored.len(), 1);
    let failed = stored[0].clone();
    assert_eq!(failed.state, SendState::Failed);
    assert!(failed.error.as_deref().unwrap().contains("nonce too low"));
    assert!(h.client.pending().list().unwrap().is_empty());

    let resent = h.client.resend_message(&failed.id).await.unwrap();
    assert_eq!(resent.id, failed.id);
    assert_eq!(resent.state, SendState::Pending);
    assert_eq!(h.client.conversations().messages(&bob_thread()).unwrap().len(), 1);

    let new_hash = payment_of(&resent).tx_hash.unwrap();
    let pending = h.client.pending().get(&new_hash).unwrap().unwrap();
    assert_eq!(pending.message.id, failed.id);
}

#[tokio::test]
async fn test_insufficient_balance_is_recorded_on_message() {
    let h = harness(5).await;

    let err = h.client.send_payment(&peer("bob"), 6).await.unwrap_err();
    assert!(matches!(err, ClientError::Submission(_)));

    let stored = h.client.conversations().messages(&bob_thread()).unwrap();
    assert_eq!(stored[0].state, SendState::Failed);
    assert_eq!(h.chain.balance(&h.address).await.unwrap(), 5);
}

#[tokio::test]
async fn test_payment_to_peer_without_address() {
    let h = harness(100).await;
    let err = h.client.send_payment(&peer("carol"), 1).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
    assert!(h.client.conversations().list_conversations().unwrap().is_empty());
}

#[tokio::test]
async fn test_accepting_request_pays_requester() {
    let h = harness(1000).await;
    let mut events = h.client.subscribe(&bob_thread());

    let request = PaymentRequest::new(200, h.bob_address.clone(), Some("lunch".into()));
    let wire = Sofa::PaymentRequest(request).encode().unwrap();
    h.bob
        .send(&ThreadId::peer(&peer("alice")), &wire)
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap();
    let ConversationChange::MessageAdded(received) = event.change else {
        panic!("expected the request to be added");
    };
    assert_eq!(received.state, SendState::Received);

    let (updated, payment) = h.client.accept_request(&received.id).await.unwrap();
    assert_eq!(updated.id, received.id);
    match updated.sofa().unwrap() {
        Sofa::PaymentRequest(request) => assert_eq!(request.state, RequestState::Accepted),
        other => panic!("unexpected envelope {other:?}"),
    }

    let payment = payment.unwrap();
    let body = payment_of(&payment);
    assert_eq!(body.value, 200);
    assert_eq!(body.to_address, h.bob_address);
    assert!(h.client.pending().contains(&hash_of(&payment)).unwrap());

    // A terminal request stays terminal.
    let err = h.client.reject_request(&received.id).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn test_incoming_chain_payment_surfaces_once() {
    let h = harness(0).await;
    let mut all = h.client.subscribe_all();
    let mut tracked = h.client.pending().subscribe();
    let carol = Wallet::generate().address().clone();

    let hash = h
        .chain
        .transfer_from_outside(carol.clone(), h.address.clone(), 7)
        .await;

    let event = tokio::time::timeout(WAIT, all.recv()).await.unwrap().unwrap();
    let ConversationChange::MessageAdded(message) = event.change else {
        panic!("expected a new message");
    };
    let carol_thread = ThreadId::Peer(PeerId::new(carol.as_str()).unwrap());
    assert_eq!(event.thread, carol_thread);
    assert_eq!(message.state, SendState::Received);
    assert_eq!(hash_of(&message), hash);
    match tokio::time::timeout(WAIT, tracked.recv()).await.unwrap().unwrap() {
        PendingEvent::Registered(entry) => assert_eq!(entry.hash, hash),
        other => panic!("expected registration, got {other:?}"),
    }

    // The same hash announced over the wire does not duplicate it, and the
    // announced value is not believed. The router handles envelopes in
    // order, so once the trailing text lands the announcement has been
    // processed.
    let mut payment = Payment::new(1_000_000, carol.clone(), h.address.clone());
    payment.tx_hash = Some(hash.clone());
    let mut bob_feed = h.client.subscribe(&bob_thread());
    let alice = ThreadId::peer(&peer("alice"));
    h.bob
        .send(&alice, &Sofa::Payment(payment).encode().unwrap())
        .await
        .unwrap();
    h.bob
        .send(&alice, &Sofa::text("sent you 7").encode().unwrap())
        .await
        .unwrap();
    let event = tokio::time::timeout(WAIT, bob_feed.recv())
        .await
        .unwrap()
        .unwrap();
    let ConversationChange::MessageAdded(text) = event.change else {
        panic!("expected the text to be added");
    };
    assert_eq!(text.kind, Kind::PlainText);
    assert_eq!(h.client.conversations().messages(&bob_thread()).unwrap().len(), 1);

    h.chain.confirm(&hash).await.unwrap();
    assert_eq!(h.client.reconcile_now().await.confirmed, 1);

    let stored = h.client.conversations().messages(&carol_thread).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].state, SendState::Received);
    assert_eq!(payment_of(&stored[0]).status, PaymentStatus::Confirmed);
    assert_eq!(payment_of(&stored[0]).value, 7);
    assert_eq!(
        h.client.conversations().conversation(&carol_thread).unwrap().unwrap().unread_count,
        1
    );
}

#[tokio::test]
async fn test_history_catch_up_on_unlock() {
    let chain = MemoryChain::new();
    let hub = LoopbackHub::new();
    let (transport, inbox) = hub.connect(peer("alice"));
    let client = SofaClient::with_database(
        ClientConfig::default(),
        Database::open_in_memory().unwrap(),
        Arc::new(chain.clone()),
        Arc::new(transport),
        inbox,
    );

    let wallet = Wallet::generate();
    let sender = Address::from_bytes(&[4u8; 20]);
    let hash = chain
        .transfer_from_outside(sender, wallet.address().clone(), 3)
        .await;

    client.unlock_wallet(wallet).await.unwrap();
    assert!(client.pending().contains(&hash).unwrap());
    client.shutdown().await;
}

#[tokio::test]
async fn test_text_failure_then_resend() {
    let mut h = harness(0).await;
    h.hub.set_online(&peer("bob"), false);

    let err = h.client.send_text(&bob_thread(), "hello").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    let failed = h.client.conversations().messages(&bob_thread()).unwrap()[0].clone();
    assert_eq!(failed.state, SendState::Failed);

    h.hub.set_online(&peer("bob"), true);
    let resent = h.client.resend_message(&failed.id).await.unwrap();
    assert_eq!(resent.id, failed.id);
    assert_eq!(resent.state, SendState::Sent);
    assert_eq!(h.client.conversations().messages(&bob_thread()).unwrap().len(), 1);

    let inbound = tokio::time::timeout(WAIT, h.bob_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(inbound.payload, "SOFA::Message:{\"body\":\"hello\"}");

    // Sent messages are not resendable.
    assert!(matches!(
        h.client.resend_message(&failed.id).await,
        Err(ClientError::Validation(_))
    ));
}

#[tokio::test]
async fn test_init_request_is_answered() {
    let mut h = harness(0).await;

    h.bob
        .send(
            &ThreadId::peer(&peer("alice")),
            &Sofa::InitRequest(Default::default()).encode().unwrap(),
        )
        .await
        .unwrap();

    let reply = tokio::time::timeout(WAIT, h.bob_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    match Sofa::decode(&reply.payload).unwrap() {
        Sofa::Init(init) => assert_eq!(init.payment_address, h.address),
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn test_external_payment_approval() {
    let h = harness(50).await;
    let mut events = h.client.subscribe_external();
    let tx = UnsignedTransaction::transfer(h.address.clone(), h.bob_address.clone(), 20);

    let outcome = h.client.request_external_payment("cb-1", tx.clone()).unwrap();
    assert!(matches!(
        h.client.request_external_payment("cb-1", tx),
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ExternalPaymentEvent::AwaitingApproval { .. }
    ));

    let hash = h.client.approve_external_payment("cb-1").await.unwrap();
    assert_eq!(outcome.await.unwrap(), ExternalOutcome::Submitted(hash.clone()));
    // Attributed to the contact that owns the destination address.
    let (thread, _) = h
        .client
        .conversations()
        .get_message(&(&hash).into())
        .unwrap()
        .unwrap();
    assert_eq!(thread, bob_thread());

    assert!(matches!(
        h.client.reject_external_payment("cb-1"),
        Err(ClientError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_external_payment_rejection() {
    let h = harness(50).await;
    let tx = UnsignedTransaction::transfer(h.address.clone(), h.bob_address.clone(), 20);

    let outcome = h.client.request_external_payment("cb-2", tx).unwrap();
    h.client.reject_external_payment("cb-2").unwrap();
    assert_eq!(outcome.await.unwrap(), ExternalOutcome::Rejected);
    assert_eq!(h.chain.balance(&h.address).await.unwrap(), 50);
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let h = harness(0).await;
    let queued = h.client.send_text(&bob_thread(), "before").await.unwrap();

    h.client.shutdown().await;

    let (_, stored) = h.client.conversations().get_message(&queued.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Sent);
    assert!(matches!(
        h.client.send_text(&bob_thread(), "after").await,
        Err(ClientError::ShuttingDown)
    ));
}

#[tokio::test]
async fn test_pending_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        db_path: Some(dir.path().join("sofa.db")),
        poll_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    };
    let chain = MemoryChain::new();
    let hub = LoopbackHub::new();
    let wallet = Wallet::generate();
    chain.credit(wallet.address(), 10).await;
    let bob_address = Wallet::generate().address().clone();

    let (transport, inbox) = hub.connect(peer("alice"));
    let client = SofaClient::start(config.clone(), Arc::new(chain.clone()), Arc::new(transport), inbox)
        .await
        .unwrap();
    client.unlock_wallet(wallet.clone()).await.unwrap();
    let sent = client
        .send_payment_to_address(&bob_thread(), &bob_address, 4)
        .await
        .unwrap();
    let hash = hash_of(&sent);
    client.shutdown().await;
    drop(client);

    chain.confirm(&hash).await.unwrap();

    let (transport, inbox) = hub.connect(peer("alice"));
    let client = SofaClient::start(config, Arc::new(chain.clone()), Arc::new(transport), inbox)
        .await
        .unwrap();
    assert!(client.pending().contains(&hash).unwrap());
    client.unlock_wallet(wallet).await.unwrap();

    assert_eq!(client.reconcile_now().await.confirmed, 1);
    let (_, stored) = client.conversations().get_message(&sent.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Sent);
    client.shutdown().await;
}

#[tokio::test]
async fn test_chain_failure_fails_message_and_stops_tracking() {
    let h = harness(100).await;
    let message = h.client.send_payment(&peer("bob"), 15).await.unwrap();
    let hash = hash_of(&message);

    h.chain.fail(&hash, "out of gas").await.unwrap();
    let report = h.client.reconcile_now().await;
    assert_eq!(report.failed, 1);

    let (_, stored) = h.client.conversations().get_message(&message.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Failed);
    assert!(stored.error.as_deref().unwrap().contains("out of gas"));
    assert_eq!(payment_of(&stored).status, PaymentStatus::Failed);
    assert!(!h.client.pending().contains(&hash).unwrap());
}

#[tokio::test]
async fn test_unreachable_ledger_keeps_entry_for_next_cycle() {
    let h = harness(100).await;
    let message = h.client.send_payment(&peer("bob"), 15).await.unwrap();
    let hash = hash_of(&message);

    h.chain.set_offline(true).await;
    let report = h.client.reconcile_now().await;
    assert_eq!(report.errors, 1);
    assert!(h.client.pending().contains(&hash).unwrap());
    let (_, stored) = h.client.conversations().get_message(&message.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Pending);

    h.chain.set_offline(false).await;
    h.chain.confirm(&hash).await.unwrap();
    assert_eq!(h.client.reconcile_now().await.confirmed, 1);
}

#[tokio::test]
async fn test_unknown_hash_kept_within_grace_period() {
    let h = harness(0).await;
    let (hash, message) = track_unknown_payment(&h);

    assert_eq!(h.client.reconcile_now().await.errors, 1);
    assert!(h.client.pending().contains(&hash).unwrap());
    let (_, stored) = h.client.conversations().get_message(&message.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Pending);
}

#[tokio::test]
async fn test_unknown_hash_fails_after_grace_period() {
    let config = ClientConfig {
        unknown_tx_grace: Duration::ZERO,
        ..ClientConfig::default()
    };
    let h = harness_with(0, config).await;
    let (hash, message) = track_unknown_payment(&h);

    assert_eq!(h.client.reconcile_now().await.failed, 1);
    assert!(!h.client.pending().contains(&hash).unwrap());
    let (_, stored) = h.client.conversations().get_message(&message.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Failed);
    assert!(stored.error.as_deref().unwrap().contains("unknown"));
}

#[tokio::test]
async fn test_announced_payment_with_unknown_hash_is_dropped() {
    let h = harness(0).await;
    let mut bob_feed = h.client.subscribe(&bob_thread());
    let bogus = TxHash::from_bytes(&[7u8; 32]);

    let mut payment = Payment::new(500, h.bob_address.clone(), h.address.clone());
    payment.tx_hash = Some(bogus.clone());
    let alice = ThreadId::peer(&peer("alice"));
    h.bob
        .send(&alice, &Sofa::Payment(payment).encode().unwrap())
        .await
        .unwrap();
    h.bob
        .send(&alice, &Sofa::text("paid").encode().unwrap())
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, bob_feed.recv())
        .await
        .unwrap()
        .unwrap();
    let ConversationChange::MessageAdded(text) = event.change else {
        panic!("expected the text to be added");
    };
    assert_eq!(text.kind, Kind::PlainText);
    assert_eq!(h.client.conversations().messages(&bob_thread()).unwrap(), vec![text]);
    assert!(h
        .client
        .conversations()
        .get_message(&MessageId::from(&bogus))
        .unwrap()
        .is_none());
    assert!(h.client.pending().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_payment_resends_submit_once() {
    let h = harness(100).await;
    h.chain.reject_next("nonce too low").await;
    h.client.send_payment(&peer("bob"), 10).await.unwrap_err();
    let failed = h.client.conversations().messages(&bob_thread()).unwrap()[0].clone();

    let (first, second) = tokio::join!(
        h.client.resend_payment(&failed.id),
        h.client.resend_message(&failed.id),
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(ClientError::Validation(_)))));

    assert_eq!(h.chain.balance(&h.address).await.unwrap(), 90);
    assert_eq!(h.client.pending().list().unwrap().len(), 1);
    assert_eq!(h.client.conversations().messages(&bob_thread()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_accepts_pay_once() {
    let h = harness(1000).await;
    let mut events = h.client.subscribe(&bob_thread());

    let request = PaymentRequest::new(200, h.bob_address.clone(), None);
    h.bob
        .send(
            &ThreadId::peer(&peer("alice")),
            &Sofa::PaymentRequest(request).encode().unwrap(),
        )
        .await
        .unwrap();
    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap();
    let ConversationChange::MessageAdded(received) = event.change else {
        panic!("expected the request to be added");
    };

    let (first, second) = tokio::join!(
        h.client.accept_request(&received.id),
        h.client.accept_request(&received.id),
    );
    let paid: Vec<_> = [first, second]
        .into_iter()
        .filter_map(|outcome| match outcome {
            Ok((_, payment)) => Some(payment.unwrap()),
            Err(e) => {
                assert!(matches!(e, ClientError::Validation(_)), "unexpected {e}");
                None
            }
        })
        .collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(h.chain.balance(&h.address).await.unwrap(), 800);
    assert_eq!(h.client.pending().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_payment_submitted_during_shutdown_stays_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        db_path: Some(dir.path().join("sofa.db")),
        poll_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    };
    let chain = MemoryChain::new();
    let gate = Arc::new(Semaphore::new(0));
    let gated = GatedChain {
        inner: chain.clone(),
        gate: gate.clone(),
    };
    let hub = LoopbackHub::new();
    let wallet = Wallet::generate();
    chain.credit(wallet.address(), 10).await;
    let bob_address = Wallet::generate().address().clone();

    let (transport, inbox) = hub.connect(peer("alice"));
    let client = SofaClient::start(config.clone(), Arc::new(gated), Arc::new(transport), inbox)
        .await
        .unwrap();
    client.unlock_wallet(wallet.clone()).await.unwrap();
    let mut events = client.subscribe(&bob_thread());

    // Shut down while the submission is held at the ledger, then let it through.
    let shut_down_mid_submit = async {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.change, ConversationChange::MessageAdded(_)));
        client.shutdown().await;
        gate.add_permits(1);
    };
    let bob = bob_thread();
    let (sent, ()) = tokio::join!(
        client.send_payment_to_address(&bob, &bob_address, 4),
        shut_down_mid_submit,
    );
    let sent = sent.unwrap();
    let hash = hash_of(&sent);
    assert!(client.pending().contains(&hash).unwrap());
    let (_, stored) = client.conversations().get_message(&sent.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Sending);
    drop(client);

    chain.confirm(&hash).await.unwrap();
    let (transport, inbox) = hub.connect(peer("alice"));
    let client = SofaClient::start(config, Arc::new(chain.clone()), Arc::new(transport), inbox)
        .await
        .unwrap();
    client.unlock_wallet(wallet).await.unwrap();
    assert_eq!(client.reconcile_now().await.confirmed, 1);
    let (_, stored) = client.conversations().get_message(&sent.id).unwrap().unwrap();
    assert_eq!(stored.state, SendState::Sent);
    client.shutdown().await;
}
