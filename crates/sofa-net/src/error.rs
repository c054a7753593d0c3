use thiserror::Error;

/// Failure of the encrypted channel. Always retryable by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer {0} is unreachable")]
    Unreachable(String),

    #[error("No session with {0}")]
    UnknownPeer(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Transport closed")]
    Closed,
}

/// Failure reported by the blockchain RPC collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u128, required: u128 },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),

    #[error("Chain RPC unavailable: {0}")]
    Unavailable(String),
}
