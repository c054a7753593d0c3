//! Incoming Transaction Manager: turns chain activity touching the wallet
//! into chat messages.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use sofa_net::{ObservedTransaction, TxStatus};
use sofa_shared::sofa::{Direction, Payment, PaymentStatus};
use sofa_shared::{Address, MessageId, PeerId, Sofa, ThreadId};
use sofa_store::ChatMessage;

use crate::context::Context;
use crate::error::Result;
use crate::queue::{DeliveryMode, DeliveryQueue, DeliveryTask};

pub struct IncomingTransactionManager {
    ctx: Arc<Context>,
    queue: DeliveryQueue,
    // The address feed and peer announcements can report the same hash at
    // once; the known-check and the insert must not interleave.
    surfacing: Mutex<()>,
}

impl IncomingTransactionManager {
    pub fn new(ctx: Arc<Context>, queue: DeliveryQueue) -> Self {
        Self {
            ctx,
            queue,
            surfacing: Mutex::new(()),
        }
    }

    /// Consume the wallet's address feed until it ends or `shutdown` flips.
    pub async fn run(
        self: Arc<Self>,
        mut feed: mpsc::Receiver<ObservedTransaction>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Watching wallet address for incoming transactions");
        loop {
            tokio::select! {
                observed = feed.recv() => {
                    let Some(observed) = observed else {
                        warn!("Address feed closed");
                        break;
                    };
                    if let Err(e) = self.handle(observed).await {
                        warn!(error = %e, "Failed to surface observed transaction");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Incoming transaction watcher stopped");
    }

    /// Surface arrivals that happened while the client was not watching.
    pub async fn catch_up(&self) -> Result<usize> {
        let wallet = self.ctx.wallet().await?;
        let history = self.ctx.chain.history(wallet.address()).await?;

        let mut surfaced = 0;
        for observed in history {
            if self.handle(observed).await?.is_some() {
                surfaced += 1;
            }
        }
        if surfaced > 0 {
            info!(count = surfaced, "Caught up on incoming payments");
        }
        Ok(surfaced)
    }

    /// Record an arrival as a Received payment message and track it until
    /// it settles. Returns `None` for anything already known or not an
    /// arrival; status changes of tracked hashes are left to the
    /// reconciliation loop.
    pub async fn handle(&self, observed: ObservedTransaction) -> Result<Option<ChatMessage>> {
        let wallet = self.ctx.wallet().await?;

        let mut payment = Payment::new(observed.value, observed.from.clone(), observed.to.clone());
        if payment.direction(wallet.address()) != Direction::Incoming {
            return Ok(None);
        }

        let _surfacing = self.surfacing.lock().await;
        let id = MessageId::from(&observed.hash);
        if self.ctx.pending.contains(&observed.hash)?
            || self.ctx.conversations.get_message(&id)?.is_some()
        {
            debug!(hash = %observed.hash, "Transaction already tracked");
            return Ok(None);
        }

        payment.tx_hash = Some(observed.hash.clone());
        payment.status = match &observed.status {
            TxStatus::Pending => PaymentStatus::Unconfirmed,
            TxStatus::Confirmed => PaymentStatus::Confirmed,
            TxStatus::Failed(_) => PaymentStatus::Failed,
        };

        let thread = self.ctx.thread_for_address(&observed.from)?;
        let sender = sender_for(&thread, &observed.from)?;
        let message = ChatMessage::incoming(sender, &Sofa::Payment(payment))?.with_id(id);

        let message = self
            .queue
            .submit(DeliveryTask::new(
                thread.clone(),
                message,
                DeliveryMode::PersistOnly,
            ))
            .await?;
        if !observed.status.is_terminal() {
            self.ctx
                .pending
                .register(observed.hash.clone(), thread.clone(), message.clone())?;
        }

        info!(hash = %observed.hash, thread = %thread, value = observed.value, "Incoming payment");
        Ok(Some(message))
    }
}

fn sender_for(thread: &ThreadId, address: &Address) -> Result<PeerId> {
    match thread.as_peer() {
        Some(peer) => Ok(peer.clone()),
        None => Ok(PeerId::new(address.as_str())?),
    }
}
