//! Payment Task Builder: pure assembly of signable payment intents.

use sofa_shared::sofa::PaymentRequest;
use sofa_shared::transaction::UnsignedTransaction;
use sofa_shared::{Address, ThreadId, ValidationError};

/// Where a payment came from, used to route its result back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOrigin {
    /// A send addressed to a chat thread.
    Direct { thread: ThreadId },
    /// A transaction handed in by an external caller awaiting approval.
    External { callback_id: String },
}

/// Everything the signer needs, plus correlation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTask {
    pub tx: UnsignedTransaction,
    pub origin: TaskOrigin,
}

impl PaymentTask {
    pub fn direct(
        thread: ThreadId,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<Self, ValidationError> {
        let from = parse_address(from)?;
        let to = parse_address(to)?;
        Ok(Self {
            tx: UnsignedTransaction::transfer(from, to, amount),
            origin: TaskOrigin::Direct { thread },
        })
    }

    /// Pay an accepted request back to its author.
    pub fn for_request(
        thread: ThreadId,
        from: &Address,
        request: &PaymentRequest,
    ) -> Result<Self, ValidationError> {
        Self::direct(
            thread,
            from.as_str(),
            request.destination_address.as_str(),
            request.value,
        )
    }

    pub fn external(callback_id: &str, tx: UnsignedTransaction) -> Result<Self, ValidationError> {
        if callback_id.trim().is_empty() {
            return Err(ValidationError::Empty("callback id"));
        }
        Ok(Self {
            tx,
            origin: TaskOrigin::External {
                callback_id: callback_id.to_string(),
            },
        })
    }

    pub fn amount(&self) -> u128 {
        self.tx.value
    }

    pub fn callback_id(&self) -> Option<&str> {
        match &self.origin {
            TaskOrigin::External { callback_id } => Some(callback_id),
            TaskOrigin::Direct { .. } => None,
        }
    }
}

fn parse_address(raw: &str) -> Result<Address, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::Empty("address"));
    }
    Address::parse(raw)
}
