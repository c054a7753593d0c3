//! Transaction Signer.
//!
//! Signing is local and never touches the network. Submission is the only
//! network call; retrying it with the same signed payload is safe because
//! the chain deduplicates by transaction hash.

use std::sync::Arc;

use tracing::debug;

use sofa_net::{ChainClient, ChainError, TxReceipt};
use sofa_shared::transaction::SignedTransaction;
use sofa_shared::Wallet;

use crate::builder::PaymentTask;
use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct TransactionSigner {
    wallet: Arc<Wallet>,
    chain: Arc<dyn ChainClient>,
}

impl TransactionSigner {
    pub fn new(wallet: Arc<Wallet>, chain: Arc<dyn ChainClient>) -> Self {
        Self { wallet, chain }
    }

    /// Sign the task's transaction, assigning a fresh nonce when the intent
    /// carries none.
    pub fn sign(&self, task: &PaymentTask) -> Result<SignedTransaction> {
        let mut tx = task.tx.clone();
        if tx.nonce.is_none() {
            tx.nonce = Some(rand::random());
        }
        let signed = self.wallet.sign_transaction(&tx)?;
        debug!(to = %tx.to, value = tx.value, "Signed transaction");
        Ok(signed)
    }

    pub async fn submit(&self, signed: &SignedTransaction) -> Result<TxReceipt> {
        let receipt = self.chain.submit(signed).await?;
        debug!(hash = %receipt.hash, "Submitted transaction");
        Ok(receipt)
    }

    /// Fail with [`ClientError::Submission`] when the wallet cannot cover
    /// `amount`.
    pub async fn ensure_funds(&self, amount: u128) -> Result<()> {
        let balance = self.chain.balance(self.wallet.address()).await?;
        if balance < amount {
            return Err(ClientError::Submission(ChainError::InsufficientFunds {
                balance,
                required: amount,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofa_net::MemoryChain;
    use sofa_shared::{Address, PeerId, ThreadId};

    fn task(wallet: &Wallet, amount: u128) -> PaymentTask {
        PaymentTask::direct(
            ThreadId::peer(&PeerId::new("bob").unwrap()),
            wallet.address().as_str(),
            Address::from_bytes(&[2u8; 20]).as_str(),
            amount,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_then_submit() {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Arc::new(Wallet::generate());
        chain.credit(wallet.address(), 50).await;
        let signer = TransactionSigner::new(wallet.clone(), chain.clone());

        let signed = signer.sign(&task(&wallet, 20)).unwrap();
        assert!(signed.tx.nonce.is_some());
        assert!(signed.verify().is_ok());

        let receipt = signer.submit(&signed).await.unwrap();
        assert_eq!(receipt.hash, signed.hash().unwrap());
        // Retrying the same payload is harmless.
        assert_eq!(signer.submit(&signed).await.unwrap(), receipt);
        assert_eq!(chain.balance(wallet.address()).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_foreign_sender_fails_signing() {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Arc::new(Wallet::generate());
        let signer = TransactionSigner::new(wallet, chain);

        let other = Wallet::generate();
        let err = signer.sign(&task(&other, 1)).unwrap_err();
        assert!(matches!(err, ClientError::Signing(_)));
    }

    #[tokio::test]
    async fn test_ensure_funds() {
        let chain = Arc::new(MemoryChain::new());
        let wallet = Arc::new(Wallet::generate());
        chain.credit(wallet.address(), 5).await;
        let signer = TransactionSigner::new(wallet, chain);

        assert!(signer.ensure_funds(5).await.is_ok());
        assert!(matches!(
            signer.ensure_funds(6).await,
            Err(ClientError::Submission(ChainError::InsufficientFunds { .. }))
        ));
    }
}
