//! Per-message exclusive sections.
//!
//! A check on a stored message followed by an action that moves funds must
//! not interleave with the same sequence on the same message. Holding a
//! [`Claim`] for the message id makes the pair atomic within the process.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use sofa_shared::MessageId;

#[derive(Default)]
pub struct Claims {
    held: Mutex<HashSet<MessageId>>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` while another caller holds it.
    pub fn try_claim(&self, id: &MessageId) -> Option<Claim<'_>> {
        if !self.lock().insert(id.clone()) {
            return None;
        }
        Some(Claim {
            claims: self,
            id: id.clone(),
        })
    }

    pub fn is_held(&self, id: &MessageId) -> bool {
        self.lock().contains(id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<MessageId>> {
        // The set stays consistent even if a holder panicked.
        match self.held.lock() {
            Ok(held) => held,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Released on drop.
pub struct Claim<'a> {
    claims: &'a Claims,
    id: MessageId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_waits_for_release() {
        let claims = Claims::new();
        let id = MessageId::new();

        let first = claims.try_claim(&id).unwrap();
        assert!(claims.try_claim(&id).is_none());
        assert!(claims.try_claim(&MessageId::new()).is_some());

        drop(first);
        assert!(!claims.is_held(&id));
        assert!(claims.try_claim(&id).is_some());
    }
}
