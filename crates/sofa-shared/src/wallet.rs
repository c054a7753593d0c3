use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::constants::ADDRESS_SIZE;
use crate::error::SigningError;
use crate::transaction::{SignedTransaction, UnsignedTransaction};
use crate::types::Address;

/// Key custody for the local user. The signing key never changes after
/// construction, so a wallet can be shared behind an `Arc` and used by
/// concurrent signing calls.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generate a new random wallet
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Restore a wallet from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_for_key(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign a raw transaction. The sender must be this wallet and the nonce
    /// must already be assigned.
    pub fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
    ) -> Result<SignedTransaction, SigningError> {
        if tx.from != self.address {
            return Err(SigningError::ForeignSender {
                from: tx.from.to_string(),
                wallet: self.address.to_string(),
            });
        }
        if tx.nonce.is_none() {
            return Err(SigningError::Encoding("transaction has no nonce".to_string()));
        }

        let signature = self.signing_key.sign(&tx.signing_bytes()?);
        Ok(SignedTransaction {
            tx: tx.clone(),
            public_key: hex::encode(self.public_key_bytes()),
            signature: hex::encode(signature.to_bytes()),
        })
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Address = first 20 bytes of blake3(pubkey).
pub fn address_for_key(key: &VerifyingKey) -> Address {
    let digest = blake3::hash(key.as_bytes());
    let mut bytes = [0u8; ADDRESS_SIZE];
    bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_SIZE]);
    Address::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_stable_across_restore() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_secret_bytes(wallet.secret_bytes());
        assert_eq!(wallet.address(), restored.address());
    }

    #[test]
    fn test_foreign_sender_rejected() {
        let wallet = Wallet::generate();
        let other = Wallet::generate();
        let mut tx = UnsignedTransaction::transfer(
            other.address().clone(),
            wallet.address().clone(),
            1,
        );
        tx.nonce = Some(1);
        assert!(matches!(
            wallet.sign_transaction(&tx),
            Err(SigningError::ForeignSender { .. })
        ));
    }

    #[test]
    fn test_missing_nonce_rejected() {
        let wallet = Wallet::generate();
        let tx = UnsignedTransaction::transfer(
            wallet.address().clone(),
            Address::from_bytes(&[1u8; 20]),
            1,
        );
        assert!(wallet.sign_transaction(&tx).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let wallet = Wallet::generate();
        let debug = format!("{wallet:?}");
        assert!(!debug.contains(&hex::encode(wallet.secret_bytes())));
    }
}
