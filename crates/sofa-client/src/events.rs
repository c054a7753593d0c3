use serde::Serialize;

use sofa_shared::transaction::UnsignedTransaction;
use sofa_shared::TxHash;

/// Progress of a transaction handed in by an external caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExternalPaymentEvent {
    AwaitingApproval {
        callback_id: String,
        tx: UnsignedTransaction,
    },
    Submitted {
        callback_id: String,
        hash: TxHash,
    },
    Rejected {
        callback_id: String,
    },
    Failed {
        callback_id: String,
        error: String,
    },
}

/// Final answer delivered to the caller of an external payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalOutcome {
    Submitted(TxHash),
    Rejected,
    Failed(String),
}
