//! Routes decrypted envelopes from the transport inbox into the store and
//! the init handshake.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use sofa_net::{ChainError, InboundPayload};
use sofa_shared::sofa::Init;
use sofa_shared::{Envelope, Sofa, ThreadId, TxHash};
use sofa_store::ChatMessage;

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::incoming::IncomingTransactionManager;
use crate::queue::{DeliveryMode, DeliveryQueue, DeliveryTask};

pub struct InboundRouter {
    ctx: Arc<Context>,
    queue: DeliveryQueue,
    incoming: Arc<IncomingTransactionManager>,
}

impl InboundRouter {
    pub fn new(
        ctx: Arc<Context>,
        queue: DeliveryQueue,
        incoming: Arc<IncomingTransactionManager>,
    ) -> Self {
        Self {
            ctx,
            queue,
            incoming,
        }
    }

    pub async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<InboundPayload>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                inbound = inbox.recv() => {
                    let Some(inbound) = inbound else {
                        debug!("Transport inbox closed");
                        break;
                    };
                    let sender = inbound.sender.clone();
                    match self.route(inbound).await {
                        Ok(_) => {}
                        Err(ClientError::ShuttingDown) => break,
                        Err(e) => warn!(sender = %sender, error = %e, "Dropped inbound envelope"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Inbound router stopped");
    }

    /// Handle one inbound envelope. Returns the stored message, if the
    /// envelope produced one.
    pub async fn route(&self, inbound: InboundPayload) -> Result<Option<ChatMessage>> {
        let thread = inbound.thread();
        let envelope = Envelope::split(&inbound.payload);
        if envelope.kind.is_local() {
            warn!(sender = %inbound.sender, kind = ?envelope.kind, "Local-only envelope arrived over the wire");
            return Ok(None);
        }

        let sofa = envelope.parse()?;
        let message = match sofa {
            Sofa::Unknown(_) => {
                debug!(sender = %inbound.sender, "Ignoring envelope with unknown header");
                return Ok(None);
            }
            Sofa::Init(init) => {
                self.ctx
                    .contacts
                    .upsert(inbound.sender.clone(), init.payment_address, init.language)?;
                return Ok(None);
            }
            Sofa::InitRequest(_) => {
                self.answer_init_request(thread).await?;
                return Ok(None);
            }
            Sofa::Payment(ref payment) => match payment.tx_hash.clone() {
                Some(hash) => return self.verify_announced_payment(&inbound, hash).await,
                None => ChatMessage::incoming(inbound.sender.clone(), &sofa)?,
            },
            Sofa::Message(_) | Sofa::Command(_) | Sofa::PaymentRequest(_) => {
                ChatMessage::incoming(inbound.sender.clone(), &sofa)?
            }
            Sofa::Timestamp(_) | Sofa::LocalStatus(_) => return Ok(None),
        };

        self.persist(thread, message).await.map(Some)
    }

    /// A peer's payment announcement is only a hint. The message is built
    /// from what the network recorded for the hash, never from the
    /// announced value or status.
    async fn verify_announced_payment(
        &self,
        inbound: &InboundPayload,
        hash: TxHash,
    ) -> Result<Option<ChatMessage>> {
        if self.ctx.try_wallet().is_none() {
            info!(sender = %inbound.sender, hash = %hash, "Wallet locked, ignoring payment announcement");
            return Ok(None);
        }
        let observed = match self.ctx.chain.transaction(&hash).await {
            Ok(observed) => observed,
            Err(ChainError::UnknownTransaction(_)) => {
                warn!(sender = %inbound.sender, hash = %hash, "Announced payment unknown to the network");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.incoming.handle(observed).await
    }

    async fn persist(&self, thread: ThreadId, message: ChatMessage) -> Result<ChatMessage> {
        self.queue
            .submit(DeliveryTask::new(thread, message, DeliveryMode::PersistOnly))
            .await
    }

    async fn answer_init_request(&self, thread: ThreadId) -> Result<()> {
        let Some(wallet) = self.ctx.try_wallet() else {
            info!(thread = %thread, "Wallet locked, not answering init request");
            return Ok(());
        };
        let init = Sofa::Init(Init {
            payment_address: wallet.address().clone(),
            language: self.ctx.config.language.clone(),
        });
        let message = ChatMessage::outgoing(self.ctx.local_peer().clone(), &init)?;
        // Fire and forget: a failed reply is only logged by the lane.
        self.queue
            .enqueue(DeliveryTask::new(thread, message, DeliveryMode::SendOnly))?;
        Ok(())
    }
}
