//! The `SofaClient` facade: lifecycle plus the method surface the
//! embedding application calls.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sofa_net::{ChainClient, InboundPayload, SecureTransport};
use sofa_shared::sofa::{InitRequest, PaymentRequest, RequestState};
use sofa_shared::transaction::UnsignedTransaction;
use sofa_shared::{Address, Kind, MessageId, PeerId, Sofa, ThreadId, TxHash, ValidationError, Wallet};
use sofa_store::{
    ChatMessage, ContactBook, ConversationEvent, ConversationStore, Database,
    PendingTransactionStore, SendState, ThreadEvents,
};

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::events::{ExternalOutcome, ExternalPaymentEvent};
use crate::inbound::InboundRouter;
use crate::incoming::IncomingTransactionManager;
use crate::outgoing::OutgoingTransactionManager;
use crate::queue::{DeliveryMode, DeliveryQueue, DeliveryTask};
use crate::updates::{ReconcileReport, UpdateTransactionManager};

pub struct SofaClient {
    ctx: Arc<Context>,
    queue: DeliveryQueue,
    outgoing: Arc<OutgoingTransactionManager>,
    incoming: Arc<IncomingTransactionManager>,
    updates: Arc<UpdateTransactionManager>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SofaClient {
    /// Open the configured database and start the background loops.
    pub async fn start(
        config: ClientConfig,
        chain: Arc<dyn ChainClient>,
        transport: Arc<dyn SecureTransport>,
        inbox: mpsc::Receiver<InboundPayload>,
    ) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(Self::with_database(config, db, chain, transport, inbox))
    }

    /// Start on an already opened database. Must be called from within a
    /// tokio runtime.
    pub fn with_database(
        config: ClientConfig,
        db: Database,
        chain: Arc<dyn ChainClient>,
        transport: Arc<dyn SecureTransport>,
        inbox: mpsc::Receiver<InboundPayload>,
    ) -> Self {
        let ctx = Arc::new(Context::new(config, db.into_shared(), chain, transport));
        let queue = DeliveryQueue::new(
            ctx.conversations.clone(),
            ctx.transport.clone(),
            ctx.config.worker_pool,
        );
        let outgoing = Arc::new(OutgoingTransactionManager::new(ctx.clone(), queue.clone()));
        let incoming = Arc::new(IncomingTransactionManager::new(ctx.clone(), queue.clone()));
        let updates = Arc::new(UpdateTransactionManager::new(
            ctx.clone(),
            queue.clone(),
            outgoing.clone(),
        ));
        let router = Arc::new(InboundRouter::new(
            ctx.clone(),
            queue.clone(),
            incoming.clone(),
        ));

        let (shutdown, _) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(router.run(inbox, shutdown.subscribe())),
            tokio::spawn(updates.clone().run(shutdown.subscribe())),
        ];
        info!(peer = %ctx.local_peer(), "SOFA client started");

        Self {
            ctx,
            queue,
            outgoing,
            incoming,
            updates,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Hand the wallet to every component waiting for it and start
    /// watching its address.
    pub async fn unlock_wallet(&self, wallet: Wallet) -> Result<Address> {
        let wallet = self.ctx.unlock(wallet);
        let address = wallet.address().clone();

        let feed = self.ctx.chain.watch(&address).await?;
        let watcher = tokio::spawn(self.incoming.clone().run(feed, self.shutdown.subscribe()));
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(watcher);
        }

        if self.ctx.config.history_catchup {
            if let Err(e) = self.incoming.catch_up().await {
                warn!(error = %e, "History catch-up failed");
            }
        }
        Ok(address)
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.ctx.try_wallet().map(|w| w.address().clone())
    }

    pub fn local_peer(&self) -> &PeerId {
        self.ctx.local_peer()
    }

    // -- Chat ------------------------------------------------------------

    /// Send any transmittable envelope and store it.
    pub async fn send(&self, thread: &ThreadId, sofa: &Sofa) -> Result<ChatMessage> {
        let message = ChatMessage::outgoing(self.ctx.local_peer().clone(), sofa)?;
        self.queue
            .submit(DeliveryTask::new(
                thread.clone(),
                message,
                DeliveryMode::SendAndPersist,
            ))
            .await
    }

    pub async fn send_text(&self, thread: &ThreadId, body: &str) -> Result<ChatMessage> {
        self.send(thread, &Sofa::text(body)).await
    }

    /// Send a failed message again under the same identity.
    pub async fn resend_message(&self, id: &MessageId) -> Result<ChatMessage> {
        let is_payment = self
            .ctx
            .conversations
            .get_message(id)?
            .is_some_and(|(_, message)| message.kind == Kind::Payment);
        if is_payment {
            return self.outgoing.resend_payment(id).await;
        }

        let _claim = self.ctx.claims.try_claim(id).ok_or_else(|| {
            ValidationError::NotResendable("message is already being resent".to_string())
        })?;
        let (thread, mut message) = self
            .ctx
            .conversations
            .get_message(id)?
            .ok_or_else(|| ClientError::NotFound(format!("message {id}")))?;
        if message.state != SendState::Failed {
            let reason = format!("message is {}", message.state.as_str());
            return Err(ValidationError::NotResendable(reason).into());
        }

        message.mark(SendState::Sending, None);
        self.queue
            .submit(DeliveryTask::new(thread, message, DeliveryMode::SendAndPersist))
            .await
    }

    /// Ask a peer for its payment address and language.
    pub async fn request_init(&self, peer: &PeerId) -> Result<()> {
        let message = ChatMessage::outgoing(
            self.ctx.local_peer().clone(),
            &Sofa::InitRequest(InitRequest::default()),
        )?;
        self.queue
            .submit(DeliveryTask::new(
                ThreadId::peer(peer),
                message,
                DeliveryMode::SendOnly,
            ))
            .await?;
        Ok(())
    }

    // -- Value -----------------------------------------------------------

    pub async fn send_payment(&self, peer: &PeerId, amount: u128) -> Result<ChatMessage> {
        self.outgoing.send_payment(peer, amount).await
    }

    pub async fn send_payment_to_address(
        &self,
        thread: &ThreadId,
        to: &Address,
        amount: u128,
    ) -> Result<ChatMessage> {
        self.outgoing
            .send_payment_to_address(thread.clone(), to, amount)
            .await
    }

    pub async fn resend_payment(&self, id: &MessageId) -> Result<ChatMessage> {
        self.outgoing.resend_payment(id).await
    }

    /// Ask `peer` to pay `amount` to the local wallet.
    pub async fn request_payment(
        &self,
        peer: &PeerId,
        amount: u128,
        memo: Option<String>,
    ) -> Result<ChatMessage> {
        let wallet = self.ctx.wallet().await?;
        let request = PaymentRequest::new(amount, wallet.address().clone(), memo);
        self.send(&ThreadId::peer(peer), &Sofa::PaymentRequest(request))
            .await
    }

    /// Accept a received payment request and pay it.
    pub async fn accept_request(
        &self,
        id: &MessageId,
    ) -> Result<(ChatMessage, Option<ChatMessage>)> {
        self.updates
            .update_payment_request_state(id, RequestState::Accepted)
            .await
    }

    pub async fn reject_request(&self, id: &MessageId) -> Result<ChatMessage> {
        let (message, _) = self
            .updates
            .update_payment_request_state(id, RequestState::Rejected)
            .await?;
        Ok(message)
    }

    pub fn request_external_payment(
        &self,
        callback_id: &str,
        tx: UnsignedTransaction,
    ) -> Result<oneshot::Receiver<ExternalOutcome>> {
        self.outgoing.request_external_payment(callback_id, tx)
    }

    pub async fn approve_external_payment(&self, callback_id: &str) -> Result<TxHash> {
        self.outgoing.approve_external_payment(callback_id).await
    }

    pub fn reject_external_payment(&self, callback_id: &str) -> Result<()> {
        self.outgoing.reject_external_payment(callback_id)
    }

    pub fn subscribe_external(&self) -> broadcast::Receiver<ExternalPaymentEvent> {
        self.outgoing.subscribe_external()
    }

    /// Run one reconciliation pass now instead of waiting for the next tick.
    pub async fn reconcile_now(&self) -> ReconcileReport {
        self.updates.reconcile_once().await
    }

    // -- Stores ----------------------------------------------------------

    pub fn conversations(&self) -> &ConversationStore {
        &self.ctx.conversations
    }

    pub fn pending(&self) -> &PendingTransactionStore {
        &self.ctx.pending
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.ctx.contacts
    }

    pub fn subscribe(&self, thread: &ThreadId) -> ThreadEvents {
        self.ctx.conversations.subscribe(thread)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<ConversationEvent> {
        self.ctx.conversations.subscribe_all()
    }

    // -- Lifecycle -------------------------------------------------------

    /// Stop accepting work, stop the background loops and wait until every
    /// task already queued has reached a terminal state.
    pub async fn shutdown(&self) {
        info!("Shutting down SOFA client");
        self.queue.close();
        let _ = self.shutdown.send(true);

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.queue.drain().await;
        info!("SOFA client stopped");
    }
}
