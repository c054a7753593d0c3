//! In-process ledger implementing [`ChainClient`].
//!
//! Submitted transactions stay pending until the owner calls
//! [`MemoryChain::confirm`] or [`MemoryChain::fail`], which makes every
//! stage of a payment observable from tests and from embedding
//! applications that run without a real network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sofa_shared::transaction::SignedTransaction;
use sofa_shared::{Address, TxHash};

use crate::chain::{ChainClient, ObservedTransaction, TxReceipt, TxStatus};
use crate::error::ChainError;

const WATCH_CAPACITY: usize = 64;

struct Record {
    observed: ObservedTransaction,
    accepted_at: DateTime<Utc>,
    /// Whether the sender's balance was debited at submission.
    debited: bool,
}

#[derive(Default)]
struct ChainState {
    balances: HashMap<Address, u128>,
    records: HashMap<TxHash, Record>,
    order: Vec<TxHash>,
    watchers: Vec<(Address, mpsc::Sender<ObservedTransaction>)>,
    offline: bool,
    reject_next: Option<String>,
}

impl ChainState {
    fn notify(&mut self, tx: &ObservedTransaction) {
        self.watchers.retain(|(address, sender)| {
            if address != &tx.from && address != &tx.to {
                return !sender.is_closed();
            }
            match sender.try_send(tx.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(address = %address, hash = %tx.hash, "Watcher full, dropping update");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    fn insert(&mut self, observed: ObservedTransaction, debited: bool) -> TxReceipt {
        let accepted_at = Utc::now();
        let hash = observed.hash.clone();
        self.notify(&observed);
        self.records.insert(
            hash.clone(),
            Record {
                observed,
                accepted_at,
                debited,
            },
        );
        self.order.push(hash.clone());
        TxReceipt { hash, accepted_at }
    }

    fn settle(&mut self, hash: &TxHash, status: TxStatus) -> Result<(), ChainError> {
        let record = self
            .records
            .get_mut(hash)
            .ok_or_else(|| ChainError::UnknownTransaction(hash.to_string()))?;
        if record.observed.status.is_terminal() {
            return Err(ChainError::Rejected(format!("{hash} is already settled")));
        }
        record.observed.status = status;

        let observed = record.observed.clone();
        match &observed.status {
            TxStatus::Confirmed => {
                *self.balances.entry(observed.to.clone()).or_default() += observed.value;
            }
            TxStatus::Failed(_) if record.debited => {
                *self.balances.entry(observed.from.clone()).or_default() += observed.value;
            }
            _ => {}
        }
        self.notify(&observed);
        Ok(())
    }
}

/// Shared handle to an in-memory ledger. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryChain {
    state: Arc<RwLock<ChainState>>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn credit(&self, address: &Address, amount: u128) {
        let mut state = self.state.write().await;
        *state.balances.entry(address.clone()).or_default() += amount;
    }

    /// While offline every RPC fails with [`ChainError::Unavailable`].
    pub async fn set_offline(&self, offline: bool) {
        self.state.write().await.offline = offline;
    }

    /// Reject the next submission with `reason`.
    pub async fn reject_next(&self, reason: impl Into<String>) {
        self.state.write().await.reject_next = Some(reason.into());
    }

    pub async fn confirm(&self, hash: &TxHash) -> Result<(), ChainError> {
        self.state.write().await.settle(hash, TxStatus::Confirmed)?;
        info!(hash = %hash, "Transaction confirmed");
        Ok(())
    }

    pub async fn fail(&self, hash: &TxHash, reason: impl Into<String>) -> Result<(), ChainError> {
        let reason = reason.into();
        self.state
            .write()
            .await
            .settle(hash, TxStatus::Failed(reason.clone()))?;
        info!(hash = %hash, reason = %reason, "Transaction failed");
        Ok(())
    }

    /// Record a pending transfer made by a wallet this ledger does not
    /// custody, such as a remote peer paying the local user.
    pub async fn transfer_from_outside(&self, from: Address, to: Address, value: u128) -> TxHash {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let observed = ObservedTransaction {
            hash: TxHash::from_bytes(&bytes),
            from,
            to,
            value,
            status: TxStatus::Pending,
        };
        self.state.write().await.insert(observed, false).hash
    }

    async fn ensure_online(&self) -> Result<(), ChainError> {
        if self.state.read().await.offline {
            return Err(ChainError::Unavailable("ledger offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MemoryChain {
    async fn balance(&self, address: &Address) -> Result<u128, ChainError> {
        self.ensure_online().await?;
        Ok(self
            .state
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<TxReceipt, ChainError> {
        let mut state = self.state.write().await;
        if state.offline {
            return Err(ChainError::Unavailable("ledger offline".to_string()));
        }
        if let Some(reason) = state.reject_next.take() {
            return Err(ChainError::Rejected(reason));
        }

        tx.verify().map_err(|e| ChainError::Rejected(e.to_string()))?;
        let hash = tx.hash().map_err(|e| ChainError::Rejected(e.to_string()))?;

        if let Some(existing) = state.records.get(&hash) {
            debug!(hash = %hash, "Duplicate submission, returning original receipt");
            return Ok(TxReceipt {
                hash,
                accepted_at: existing.accepted_at,
            });
        }

        let balance = state.balances.get(&tx.tx.from).copied().unwrap_or(0);
        if balance < tx.tx.value {
            return Err(ChainError::InsufficientFunds {
                balance,
                required: tx.tx.value,
            });
        }
        state.balances.insert(tx.tx.from.clone(), balance - tx.tx.value);

        let receipt = state.insert(
            ObservedTransaction {
                hash,
                from: tx.tx.from.clone(),
                to: tx.tx.to.clone(),
                value: tx.tx.value,
                status: TxStatus::Pending,
            },
            true,
        );
        debug!(hash = %receipt.hash, "Accepted transaction");
        Ok(receipt)
    }

    async fn status(&self, hash: &TxHash) -> Result<TxStatus, ChainError> {
        self.ensure_online().await?;
        self.state
            .read()
            .await
            .records
            .get(hash)
            .map(|r| r.observed.status.clone())
            .ok_or_else(|| ChainError::UnknownTransaction(hash.to_string()))
    }

    async fn transaction(&self, hash: &TxHash) -> Result<ObservedTransaction, ChainError> {
        self.ensure_online().await?;
        self.state
            .read()
            .await
            .records
            .get(hash)
            .map(|r| r.observed.clone())
            .ok_or_else(|| ChainError::UnknownTransaction(hash.to_string()))
    }

    async fn history(&self, address: &Address) -> Result<Vec<ObservedTransaction>, ChainError> {
        self.ensure_online().await?;
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|hash| state.records.get(hash))
            .map(|r| &r.observed)
            .filter(|tx| &tx.from == address || &tx.to == address)
            .cloned()
            .collect())
    }

    async fn watch(
        &self,
        address: &Address,
    ) -> Result<mpsc::Receiver<ObservedTransaction>, ChainError> {
        self.ensure_online().await?;
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        self.state.write().await.watchers.push((address.clone(), tx));
        Ok(rx)
    }
}
