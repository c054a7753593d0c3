//! Blockchain RPC seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use sofa_shared::sofa::hex_value;
use sofa_shared::transaction::SignedTransaction;
use sofa_shared::{Address, TxHash};

use crate::error::ChainError;

/// Acknowledgement that the network accepted a signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed(String),
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// A transaction seen on the network that touches a watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTransaction {
    pub hash: TxHash,
    pub from: Address,
    pub to: Address,
    #[serde(with = "hex_value")]
    pub value: u128,
    pub status: TxStatus,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn balance(&self, address: &Address) -> Result<u128, ChainError>;

    /// Broadcast a signed transaction. Submitting a payload the network
    /// already knows returns the original receipt and moves no funds.
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxReceipt, ChainError>;

    async fn status(&self, hash: &TxHash) -> Result<TxStatus, ChainError>;

    /// The transaction behind `hash` as the network recorded it. Unknown
    /// hashes are [`ChainError::UnknownTransaction`].
    async fn transaction(&self, hash: &TxHash) -> Result<ObservedTransaction, ChainError>;

    /// Every known transaction sent from or to `address`, oldest first.
    async fn history(&self, address: &Address) -> Result<Vec<ObservedTransaction>, ChainError>;

    /// Live feed of transactions touching `address` and of their status
    /// changes. The feed ends when the receiver is dropped.
    async fn watch(&self, address: &Address)
        -> Result<mpsc::Receiver<ObservedTransaction>, ChainError>;
}
