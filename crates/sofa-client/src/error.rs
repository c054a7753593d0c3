use thiserror::Error;

use sofa_net::{ChainError, TransportError};
use sofa_shared::{ParseError, SigningError, TxHash, ValidationError};
use sofa_store::StoreError;

/// Errors surfaced by the client core.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Malformed intent or envelope, rejected before any I/O.
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The wallet refused to sign the intent.
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The network rejected a signed transaction, or the pre-sign balance
    /// check failed.
    #[error("Submission failed: {0}")]
    Submission(#[from] ChainError),

    #[error("Malformed envelope: {0}")]
    Parse(#[from] ParseError),

    /// A confirmation poll failed; the entry is retried next cycle.
    #[error("Could not reconcile {hash}: {source}")]
    Reconciliation { hash: TxHash, source: ChainError },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Client is shutting down")]
    ShuttingDown,

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
