//! Explicitly constructed dependencies shared by every client component.

use std::sync::Arc;

use tracing::info;

use sofa_net::{ChainClient, SecureTransport};
use sofa_shared::{Address, PeerId, ThreadId, Wallet};
use sofa_store::{ContactBook, ConversationStore, PendingTransactionStore, SharedDatabase};

use crate::claims::Claims;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::readiness::Readiness;

pub struct Context {
    pub config: ClientConfig,
    pub conversations: ConversationStore,
    pub pending: PendingTransactionStore,
    pub contacts: ContactBook,
    pub chain: Arc<dyn ChainClient>,
    pub transport: Arc<dyn SecureTransport>,
    /// Messages with a value-moving operation in flight.
    pub claims: Claims,
    wallet: Readiness<Arc<Wallet>>,
}

impl Context {
    pub fn new(
        config: ClientConfig,
        db: SharedDatabase,
        chain: Arc<dyn ChainClient>,
        transport: Arc<dyn SecureTransport>,
    ) -> Self {
        Self {
            config,
            conversations: ConversationStore::new(db.clone()),
            pending: PendingTransactionStore::new(db.clone()),
            contacts: ContactBook::new(db),
            chain,
            transport,
            claims: Claims::new(),
            wallet: Readiness::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.transport.local_peer()
    }

    /// Publish the wallet to every component awaiting it.
    pub fn unlock(&self, wallet: Wallet) -> Arc<Wallet> {
        let wallet = Arc::new(wallet);
        info!(address = %wallet.address(), "Wallet unlocked");
        self.wallet.set(wallet.clone());
        wallet
    }

    /// The unlocked wallet. Waits until [`Context::unlock`] has run.
    pub async fn wallet(&self) -> Result<Arc<Wallet>> {
        self.wallet.wait().await
    }

    pub fn try_wallet(&self) -> Option<Arc<Wallet>> {
        self.wallet.get()
    }

    /// Thread of the peer owning `address`, or a thread keyed by the
    /// address itself when no contact announced it.
    pub fn thread_for_address(&self, address: &Address) -> Result<ThreadId> {
        if let Some(contact) = self.contacts.by_address(address)? {
            return Ok(ThreadId::peer(&contact.peer_id));
        }
        Ok(ThreadId::Peer(PeerId::new(address.as_str())?))
    }
}
