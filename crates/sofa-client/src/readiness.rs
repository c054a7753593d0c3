//! One-time initialization signal.
//!
//! Components that need a value produced later in the lifecycle (the
//! unlocked wallet) await it here instead of polling.

use tokio::sync::watch;

use crate::error::{ClientError, Result};

pub struct Readiness<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Readiness<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish the value and wake every waiter. Later calls replace it.
    pub fn set(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolve once the value has been published.
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.tx.subscribe();
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::Cancelled)?;
        value.clone().ok_or(ClientError::Cancelled)
    }
}

impl<T: Clone> Default for Readiness<T> {
    fn default() -> Self {
        Self::new()
    }
}
