use thiserror::Error;

use crate::envelope::Kind;

/// A body behind a recognised header could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{kind:?} envelope has no JSON object body")]
    MissingBody { kind: Kind },

    #[error("{kind:?} envelope body is not terminated")]
    UnterminatedBody { kind: Kind },

    #[error("{kind:?} envelope body is malformed: {reason}")]
    MalformedBody { kind: Kind, reason: String },
}

/// Input rejected before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid transaction hash: {0:?}")]
    InvalidTxHash(String),

    #[error("Empty {0}")]
    Empty(&'static str),

    #[error("Invalid thread id: {0:?}")]
    InvalidThreadId(String),

    #[error("Payment request is already {0}")]
    RequestClosed(String),

    #[error("{0:?} envelopes are never transmitted")]
    NotTransmittable(Kind),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Recipient {0} has no known payment address")]
    UnknownRecipient(String),

    #[error("Message cannot be resent: {0}")]
    NotResendable(String),

    #[error("Expected a {expected:?} envelope, found {found:?}")]
    WrongKind { expected: Kind, found: Kind },

    #[error("Callback id {0:?} is already awaiting approval")]
    DuplicateCallback(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Transaction sender {from} does not belong to this wallet ({wallet})")]
    ForeignSender { from: String, wallet: String },

    #[error("Transaction could not be encoded: {0}")]
    Encoding(String),

    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,
}
