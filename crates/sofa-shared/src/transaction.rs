//! Raw transactions as the wallet signs them and the chain receives them.

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::KDF_CONTEXT_TX_HASH;
use crate::error::SigningError;
use crate::sofa::hex_value;
use crate::types::{Address, TxHash};
use crate::wallet::address_for_key;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub from: Address,
    pub to: Address,
    #[serde(with = "hex_value")]
    pub value: u128,
    /// Assigned by the signer when the intent does not carry one.
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub data: Option<String>,
}

impl UnsignedTransaction {
    pub fn transfer(from: Address, to: Address, value: u128) -> Self {
        Self {
            from,
            to,
            value,
            nonce: None,
            data: None,
        }
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, SigningError> {
        bincode::serialize(&(
            self.from.as_str(),
            self.to.as_str(),
            self.value,
            self.nonce,
            self.data.as_deref(),
        ))
        .map_err(|e| SigningError::Encoding(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub tx: UnsignedTransaction,
    /// Hex-encoded Ed25519 public key of the signer.
    pub public_key: String,
    /// Hex-encoded Ed25519 signature over [`UnsignedTransaction::signing_bytes`].
    pub signature: String,
}

impl SignedTransaction {
    /// Identity of the transaction on the network. Resubmitting the same
    /// signed payload always yields the same hash.
    pub fn hash(&self) -> Result<TxHash, SigningError> {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_TX_HASH);
        hasher.update(&self.tx.signing_bytes()?);
        hasher.update(self.signature.as_bytes());
        Ok(TxHash::from_bytes(hasher.finalize().as_bytes()))
    }

    /// Check the signature and that the sender address belongs to the key.
    pub fn verify(&self) -> Result<(), SigningError> {
        let key_bytes: [u8; 32] = hex::decode(&self.public_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(SigningError::InvalidSignature)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| SigningError::InvalidSignature)?;

        if address_for_key(&verifying_key) != self.tx.from {
            return Err(SigningError::ForeignSender {
                from: self.tx.from.to_string(),
                wallet: address_for_key(&verifying_key).to_string(),
            });
        }

        let sig_bytes = hex::decode(&self.signature).map_err(|_| SigningError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| SigningError::InvalidSignature)?;
        verifying_key
            .verify_strict(&self.tx.signing_bytes()?, &signature)
            .map_err(|_| SigningError::InvalidSignature)
    }
}
