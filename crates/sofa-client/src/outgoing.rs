//! Outgoing Transaction Manager.
//!
//! A payment moves through `sign -> persist (Sending) -> submit` and ends
//! either `Pending` with its hash registered in the pending store, or
//! `Failed` with the submission error attached and nothing registered.
//! Every store write goes through the recipient's delivery lane, so the
//! later confirmation update can never overtake these writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use sofa_shared::sofa::Payment;
use sofa_shared::transaction::UnsignedTransaction;
use sofa_shared::{Address, Kind, MessageId, PeerId, Sofa, ThreadId, TxHash, ValidationError, Wallet};
use sofa_store::{ChatMessage, SendState};

use crate::builder::PaymentTask;
use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::events::{ExternalOutcome, ExternalPaymentEvent};
use crate::queue::{DeliveryMode, DeliveryQueue, DeliveryTask};
use crate::signer::TransactionSigner;

const EVENT_CAPACITY: usize = 64;

struct ExternalRequest {
    task: PaymentTask,
    reply: oneshot::Sender<ExternalOutcome>,
}

pub struct OutgoingTransactionManager {
    ctx: Arc<Context>,
    queue: DeliveryQueue,
    external: Mutex<HashMap<String, ExternalRequest>>,
    events: broadcast::Sender<ExternalPaymentEvent>,
}

impl OutgoingTransactionManager {
    pub fn new(ctx: Arc<Context>, queue: DeliveryQueue) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ctx,
            queue,
            external: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Pay a peer at the address it announced in its Init envelope.
    pub async fn send_payment(&self, peer: &PeerId, amount: u128) -> Result<ChatMessage> {
        let contact = self
            .ctx
            .contacts
            .get(peer)?
            .ok_or_else(|| ValidationError::UnknownRecipient(peer.to_string()))?;
        self.send_payment_to_address(ThreadId::peer(peer), &contact.payment_address, amount)
            .await
    }

    pub async fn send_payment_to_address(
        &self,
        thread: ThreadId,
        to: &Address,
        amount: u128,
    ) -> Result<ChatMessage> {
        let wallet = self.ctx.wallet().await?;
        let task = PaymentTask::direct(
            thread.clone(),
            wallet.address().as_str(),
            to.as_str(),
            amount,
        )?;
        let (_, message) = self.execute(&wallet, thread, task, None).await?;
        Ok(message)
    }

    /// Sign and submit a failed payment again under the same message
    /// identity.
    ///
    /// Only one resend of a message runs at a time; a concurrent call fails
    /// with [`ValidationError::NotResendable`].
    pub async fn resend_payment(&self, id: &MessageId) -> Result<ChatMessage> {
        let _claim = self.ctx.claims.try_claim(id).ok_or_else(|| {
            ValidationError::NotResendable("payment is already being resent".to_string())
        })?;
        let (thread, message) = self
            .ctx
            .conversations
            .get_message(id)?
            .ok_or_else(|| ClientError::NotFound(format!("message {id}")))?;
        if message.state != SendState::Failed {
            return Err(ValidationError::NotResendable(format!(
                "payment is {}",
                message.state.as_str()
            ))
            .into());
        }
        let Sofa::Payment(payment) = message.sofa()? else {
            return Err(ValidationError::WrongKind {
                expected: Kind::Payment,
                found: message.kind,
            }
            .into());
        };

        let wallet = self.ctx.wallet().await?;
        let task = PaymentTask::direct(
            thread.clone(),
            wallet.address().as_str(),
            payment.to_address.as_str(),
            payment.value,
        )?;
        info!(message = %id, thread = %thread, "Resending payment");
        let (_, message) = self.execute(&wallet, thread, task, Some(message)).await?;
        Ok(message)
    }

    pub fn subscribe_external(&self) -> broadcast::Receiver<ExternalPaymentEvent> {
        self.events.subscribe()
    }

    /// Park an externally supplied transaction until the user approves or
    /// rejects it. The receiver resolves with the final outcome.
    pub fn request_external_payment(
        &self,
        callback_id: &str,
        tx: UnsignedTransaction,
    ) -> Result<oneshot::Receiver<ExternalOutcome>> {
        let task = PaymentTask::external(callback_id, tx.clone())?;
        let (reply, outcome) = oneshot::channel();
        {
            let mut external = self.external.lock().map_err(|_| ClientError::Cancelled)?;
            if external.contains_key(callback_id) {
                return Err(ValidationError::DuplicateCallback(callback_id.to_string()).into());
            }
            external.insert(callback_id.to_string(), ExternalRequest { task, reply });
        }

        debug!(callback_id, to = %tx.to, value = tx.value, "External payment awaiting approval");
        let _ = self.events.send(ExternalPaymentEvent::AwaitingApproval {
            callback_id: callback_id.to_string(),
            tx,
        });
        Ok(outcome)
    }

    pub async fn approve_external_payment(&self, callback_id: &str) -> Result<TxHash> {
        let ExternalRequest { task, reply } = self.take_external(callback_id)?;
        let callback_id = callback_id.to_string();

        let result = async {
            let wallet = self.ctx.wallet().await?;
            let thread = self.ctx.thread_for_address(&task.tx.to)?;
            self.execute(&wallet, thread, task, None).await
        }
        .await;

        match result {
            Ok((hash, _)) => {
                let _ = reply.send(ExternalOutcome::Submitted(hash.clone()));
                let _ = self.events.send(ExternalPaymentEvent::Submitted {
                    callback_id,
                    hash: hash.clone(),
                });
                Ok(hash)
            }
            Err(e) => {
                let _ = reply.send(ExternalOutcome::Failed(e.to_string()));
                let _ = self.events.send(ExternalPaymentEvent::Failed {
                    callback_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn reject_external_payment(&self, callback_id: &str) -> Result<()> {
        let request = self.take_external(callback_id)?;
        debug!(callback_id, "External payment rejected");
        let _ = request.reply.send(ExternalOutcome::Rejected);
        let _ = self.events.send(ExternalPaymentEvent::Rejected {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }

    fn take_external(&self, callback_id: &str) -> Result<ExternalRequest> {
        self.external
            .lock()
            .map_err(|_| ClientError::Cancelled)?
            .remove(callback_id)
            .ok_or_else(|| ClientError::NotFound(format!("external payment {callback_id:?}")))
    }

    async fn execute(
        &self,
        wallet: &Arc<Wallet>,
        thread: ThreadId,
        task: PaymentTask,
        existing: Option<ChatMessage>,
    ) -> Result<(TxHash, ChatMessage)> {
        let signer = TransactionSigner::new(wallet.clone(), self.ctx.chain.clone());
        let signed = signer.sign(&task)?;
        let hash = signed.hash()?;

        let mut payment = Payment::new(task.amount(), task.tx.from.clone(), task.tx.to.clone());
        payment.tx_hash = Some(hash.clone());
        let sofa = Sofa::Payment(payment);

        let message = match existing {
            Some(mut message) => {
                message.set_sofa(&sofa)?;
                message.mark(SendState::Sending, None);
                message
            }
            None => ChatMessage::outgoing(self.ctx.local_peer().clone(), &sofa)?
                .with_id(MessageId::from(&hash)),
        };
        let mut message = self
            .queue
            .submit(DeliveryTask::new(
                thread.clone(),
                message,
                DeliveryMode::PersistOnly,
            ))
            .await?;

        let submitted = async {
            if self.ctx.config.check_balance {
                signer.ensure_funds(task.amount()).await?;
            }
            signer.submit(&signed).await
        }
        .await;

        if let Err(e) = submitted {
            warn!(hash = %hash, thread = %thread, error = %e, "Payment submission failed");
            message.mark(SendState::Failed, Some(e.to_string()));
            let recorded = self
                .queue
                .submit(DeliveryTask::new(thread, message.clone(), DeliveryMode::UpdateExisting))
                .await;
            if let Err(ClientError::ShuttingDown) = recorded {
                // The lane is gone; nothing else writes this message now.
                self.ctx.conversations.update(&message)?;
            } else {
                recorded?;
            }
            return Err(e);
        }

        // The transaction is on the network from here on. Both writes are
        // queued before the hash becomes visible to reconciliation, so a
        // confirmation can only land after them, and the hash is tracked
        // even when the queue has already closed.
        let notified = self.queue.enqueue(DeliveryTask::new(
            thread.clone(),
            message.clone(),
            DeliveryMode::SendOnly,
        ));
        message.mark(SendState::Pending, None);
        let updated = self.queue.enqueue(DeliveryTask::new(
            thread.clone(),
            message.clone(),
            DeliveryMode::UpdateExisting,
        ));
        self.ctx
            .pending
            .register(hash.clone(), thread.clone(), message.clone())?;
        info!(hash = %hash, thread = %thread, "Payment pending");

        let (notified, updated) = match (notified, updated) {
            (Ok(notified), Ok(updated)) => (notified, updated),
            (Err(e), _) | (_, Err(e)) => {
                warn!(hash = %hash, error = %e, "Payment submitted while the queue closed, leaving it to reconciliation");
                return Ok((hash, message));
            }
        };

        match notified.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(hash = %hash, error = %e, "Recipient not notified of payment"),
            Err(_) => debug!(hash = %hash, "Payment notification dropped"),
        }
        let message = updated.await.map_err(|_| ClientError::Cancelled)??;
        Ok((hash, message))
    }
}
