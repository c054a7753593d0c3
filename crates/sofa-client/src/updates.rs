//! Update Transaction Manager.
//!
//! Polls every entry of the pending store on a fixed interval. A terminal
//! on-chain status is mirrored into the associated message through its
//! thread's delivery lane, and only once that write has settled is the
//! entry removed. A failed poll leaves the entry for the next cycle, except
//! that a hash the network still does not know after the configured grace
//! period is settled as failed.
//!
//! Also owns the accept/reject transition of payment requests.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sofa_net::{ChainError, TxStatus};
use sofa_shared::sofa::{PaymentStatus, RequestState};
use sofa_shared::{Kind, MessageId, Sofa, ValidationError};
use sofa_store::{ChatMessage, PendingTransaction, SendState};

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::outgoing::OutgoingTransactionManager;
use crate::queue::{DeliveryMode, DeliveryQueue, DeliveryTask};

const UNKNOWN_TX_REASON: &str = "transaction unknown to the network";

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

enum Settled {
    Confirmed,
    Failed,
    StillPending,
}

pub struct UpdateTransactionManager {
    ctx: Arc<Context>,
    queue: DeliveryQueue,
    outgoing: Arc<OutgoingTransactionManager>,
}

impl UpdateTransactionManager {
    pub fn new(
        ctx: Arc<Context>,
        queue: DeliveryQueue,
        outgoing: Arc<OutgoingTransactionManager>,
    ) -> Self {
        Self {
            ctx,
            queue,
            outgoing,
        }
    }

    /// Reconcile on every tick until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.ctx.config.poll_interval.as_millis() as u64, "Reconciliation loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.reconcile_once().await;
                    if report != ReconcileReport::default() {
                        debug!(?report, "Reconciliation pass");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reconciliation loop stopped");
    }

    /// Poll every pending entry once, concurrently.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let entries = match self.ctx.pending.list() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Could not list pending transactions");
                return ReconcileReport {
                    errors: 1,
                    ..Default::default()
                };
            }
        };

        let outcomes = join_all(entries.into_iter().map(|entry| self.reconcile(entry))).await;

        let mut report = ReconcileReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(Settled::Confirmed) => report.confirmed += 1,
                Ok(Settled::Failed) => report.failed += 1,
                Ok(Settled::StillPending) => report.pending += 1,
                Err(e) => {
                    warn!(error = %e, "Reconciliation failed, retrying next cycle");
                    report.errors += 1;
                }
            }
        }
        report
    }

    async fn reconcile(&self, entry: PendingTransaction) -> Result<Settled> {
        let status = match self.ctx.chain.status(&entry.hash).await {
            Ok(status) => status,
            Err(ChainError::UnknownTransaction(_)) if self.unknown_too_long(&entry) => {
                warn!(hash = %entry.hash, "Network never saw transaction, giving up");
                TxStatus::Failed(UNKNOWN_TX_REASON.to_string())
            }
            Err(source) => {
                return Err(ClientError::Reconciliation {
                    hash: entry.hash.clone(),
                    source,
                })
            }
        };

        let (payment_status, settled) = match &status {
            TxStatus::Pending => return Ok(Settled::StillPending),
            TxStatus::Confirmed => (PaymentStatus::Confirmed, Settled::Confirmed),
            TxStatus::Failed(_) => (PaymentStatus::Failed, Settled::Failed),
        };

        // Prefer the stored message over the snapshot: it may have been
        // updated since registration.
        let mut message = match self.ctx.conversations.get_message(&entry.message.id)? {
            Some((_, stored)) => stored,
            None => entry.message.clone(),
        };

        if let Ok(Sofa::Payment(mut payment)) = message.sofa() {
            payment.status = payment_status;
            message.set_sofa(&Sofa::Payment(payment))?;
        }
        match &status {
            TxStatus::Failed(reason) => message.mark(SendState::Failed, Some(reason.clone())),
            _ if message.state == SendState::Received => {}
            _ => message.mark(SendState::Sent, None),
        }

        let written = self
            .queue
            .submit(DeliveryTask::new(
                entry.thread.clone(),
                message,
                DeliveryMode::UpdateExisting,
            ))
            .await;
        match written {
            Ok(_) => {}
            // The message was deleted locally; nothing left to mirror into.
            Err(ClientError::NotFound(_)) => {
                debug!(hash = %entry.hash, "Message gone, dropping pending entry")
            }
            Err(e) => return Err(e),
        }

        self.ctx.pending.remove(&entry.hash)?;
        info!(hash = %entry.hash, thread = %entry.thread, status = ?status, "Transaction settled");
        Ok(settled)
    }

    fn unknown_too_long(&self, entry: &PendingTransaction) -> bool {
        Utc::now()
            .signed_duration_since(entry.registered_at)
            .to_std()
            .is_ok_and(|age| age >= self.ctx.config.unknown_tx_grace)
    }

    /// Move a payment request to a terminal state and store the rewritten
    /// envelope. Accepting a request received from a peer pays it.
    ///
    /// Returns the updated request and, when one was made, the payment.
    pub async fn update_payment_request_state(
        &self,
        id: &MessageId,
        state: RequestState,
    ) -> Result<(ChatMessage, Option<ChatMessage>)> {
        // Held until the payment is submitted, so only the caller that moved
        // the request out of Pending can pay it.
        let _claim = self
            .ctx
            .claims
            .try_claim(id)
            .ok_or_else(|| ValidationError::RequestClosed("being answered".to_string()))?;
        let (thread, mut message) = self
            .ctx
            .conversations
            .get_message(id)?
            .ok_or_else(|| ClientError::NotFound(format!("message {id}")))?;
        let Sofa::PaymentRequest(mut request) = message.sofa()? else {
            return Err(ValidationError::WrongKind {
                expected: Kind::PaymentRequest,
                found: message.kind,
            }
            .into());
        };

        request.transition(state)?;
        message.set_sofa(&Sofa::PaymentRequest(request.clone()))?;
        let message = self
            .queue
            .submit(DeliveryTask::new(
                thread.clone(),
                message,
                DeliveryMode::UpdateExisting,
            ))
            .await?;
        info!(message = %id, state = state.as_str(), "Payment request updated");

        if state != RequestState::Accepted || !message.is_incoming() {
            return Ok((message, None));
        }

        let payment = self
            .outgoing
            .send_payment_to_address(thread, &request.destination_address, request.value)
            .await?;
        Ok((message, Some(payment)))
    }
}
