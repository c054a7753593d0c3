//! Shared store handles and their change feeds.
//!
//! Each handle is cheap to clone and wraps the same [`SharedDatabase`].
//! Every successful write is announced on a broadcast channel; subscribers
//! that fall behind skip the missed events and carry on.

use chrono::{SubsecRound, Utc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use sofa_shared::{Address, MessageId, PeerId, ThreadId, TxHash};

use crate::database::SharedDatabase;
use crate::error::{Result, StoreError};
use crate::models::{ChatMessage, Contact, Conversation, PendingTransaction, Upsert};

const EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Conversation store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationChange {
    MessageAdded(ChatMessage),
    MessageUpdated(ChatMessage),
    MessageDeleted(MessageId),
    ConversationChanged(Conversation),
    ConversationDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    pub thread: ThreadId,
    pub change: ConversationChange,
}

/// Durable owner of conversations and their messages.
#[derive(Clone)]
pub struct ConversationStore {
    db: SharedDatabase,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationStore {
    pub fn new(db: SharedDatabase) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { db, events }
    }

    /// Append a message, or replace the stored one with the same identity.
    pub fn append(&self, thread: &ThreadId, message: &ChatMessage) -> Result<Upsert> {
        let (outcome, conversation) = {
            let db = self.db.lock()?;
            let outcome = db.upsert_message(thread, message)?;
            let (stored_thread, _) = db.get_message(&message.id)?;
            (outcome, db.get_conversation(&stored_thread)?)
        };

        debug!(
            thread = %conversation.thread,
            message = %message.id,
            state = message.state.as_str(),
            outcome = ?outcome,
            "Stored message"
        );

        let change = match outcome {
            Upsert::Inserted => ConversationChange::MessageAdded(message.clone()),
            Upsert::Replaced => ConversationChange::MessageUpdated(message.clone()),
        };
        self.emit(conversation.thread.clone(), change);
        self.emit(
            conversation.thread.clone(),
            ConversationChange::ConversationChanged(conversation),
        );
        Ok(outcome)
    }

    /// Overwrite an existing message by identity. Returns `None` and writes
    /// nothing when the identity is unknown.
    pub fn update(&self, message: &ChatMessage) -> Result<Option<ThreadId>> {
        let (thread, conversation) = {
            let db = self.db.lock()?;
            match db.update_message(message)? {
                Some(thread) => {
                    let conversation = db.get_conversation(&thread)?;
                    (thread, conversation)
                }
                None => {
                    debug!(message = %message.id, "Update skipped, message not stored");
                    return Ok(None);
                }
            }
        };

        debug!(thread = %thread, message = %message.id, state = message.state.as_str(), "Updated message");
        self.emit(
            thread.clone(),
            ConversationChange::MessageUpdated(message.clone()),
        );
        self.emit(
            thread.clone(),
            ConversationChange::ConversationChanged(conversation),
        );
        Ok(Some(thread))
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Option<(ThreadId, ChatMessage)>> {
        match self.db.lock()?.get_message(id) {
            Ok(found) => Ok(Some(found)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every message of a thread, oldest first.
    pub fn messages(&self, thread: &ThreadId) -> Result<Vec<ChatMessage>> {
        self.db.lock()?.messages_for_thread(thread, u32::MAX, 0)
    }

    pub fn conversation(&self, thread: &ThreadId) -> Result<Option<Conversation>> {
        match self.db.lock()?.get_conversation(thread) {
            Ok(conversation) => Ok(Some(conversation)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.db.lock()?.list_conversations()
    }

    pub fn mark_read(&self, thread: &ThreadId) -> Result<bool> {
        self.change_conversation(thread, |db| db.mark_conversation_read(thread))
    }

    pub fn set_muted(&self, thread: &ThreadId, muted: bool) -> Result<bool> {
        self.change_conversation(thread, |db| db.set_conversation_muted(thread, muted))
    }

    pub fn accept(&self, thread: &ThreadId) -> Result<bool> {
        self.change_conversation(thread, |db| db.accept_conversation(thread))
    }

    pub fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let thread = self.db.lock()?.delete_message(id)?;
        if let Some(thread) = thread {
            self.emit(thread, ConversationChange::MessageDeleted(id.clone()));
            return Ok(true);
        }
        Ok(false)
    }

    pub fn delete_conversation(&self, thread: &ThreadId) -> Result<bool> {
        let deleted = self.db.lock()?.delete_conversation(thread)?;
        if deleted {
            self.emit(thread.clone(), ConversationChange::ConversationDeleted);
        }
        Ok(deleted)
    }

    /// Change feed for one thread. Dropping it unsubscribes.
    pub fn subscribe(&self, thread: &ThreadId) -> ThreadEvents {
        ThreadEvents {
            thread: thread.clone(),
            rx: self.events.subscribe(),
        }
    }

    /// Change feed for every thread.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    fn change_conversation<F>(&self, thread: &ThreadId, op: F) -> Result<bool>
    where
        F: FnOnce(&crate::Database) -> Result<bool>,
    {
        let conversation = {
            let db = self.db.lock()?;
            if !op(&db)? {
                return Ok(false);
            }
            db.get_conversation(thread)?
        };
        self.emit(
            thread.clone(),
            ConversationChange::ConversationChanged(conversation),
        );
        Ok(true)
    }

    fn emit(&self, thread: ThreadId, change: ConversationChange) {
        // No subscribers is not an error.
        let _ = self.events.send(ConversationEvent { thread, change });
    }
}

/// Events of a single thread, filtered out of the global feed.
pub struct ThreadEvents {
    thread: ThreadId,
    rx: broadcast::Receiver<ConversationEvent>,
}

impl ThreadEvents {
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// Next event for this thread, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.thread == self.thread => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(thread = %self.thread, missed, "Conversation subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pending transaction store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    Registered(PendingTransaction),
    Updated(TxHash),
    Removed(TxHash),
}

/// Durable map of in-flight transaction hash to its chat message.
#[derive(Clone)]
pub struct PendingTransactionStore {
    db: SharedDatabase,
    events: broadcast::Sender<PendingEvent>,
}

impl PendingTransactionStore {
    pub fn new(db: SharedDatabase) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { db, events }
    }

    pub fn register(&self, hash: TxHash, thread: ThreadId, message: ChatMessage) -> Result<()> {
        let pending = PendingTransaction {
            hash,
            thread,
            message,
            registered_at: Utc::now().trunc_subsecs(6),
        };
        self.db.lock()?.insert_pending(&pending)?;
        debug!(hash = %pending.hash, thread = %pending.thread, "Registered pending transaction");
        let _ = self.events.send(PendingEvent::Registered(pending));
        Ok(())
    }

    pub fn update_message(&self, hash: &TxHash, message: &ChatMessage) -> Result<bool> {
        let updated = self.db.lock()?.update_pending_message(hash, message)?;
        if updated {
            let _ = self.events.send(PendingEvent::Updated(hash.clone()));
        }
        Ok(updated)
    }

    pub fn remove(&self, hash: &TxHash) -> Result<bool> {
        let removed = self.db.lock()?.remove_pending(hash)?;
        if removed {
            debug!(hash = %hash, "Removed pending transaction");
            let _ = self.events.send(PendingEvent::Removed(hash.clone()));
        }
        Ok(removed)
    }

    pub fn get(&self, hash: &TxHash) -> Result<Option<PendingTransaction>> {
        match self.db.lock()?.get_pending(hash) {
            Ok(pending) => Ok(Some(pending)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, hash: &TxHash) -> Result<bool> {
        Ok(self.get(hash)?.is_some())
    }

    pub fn list(&self) -> Result<Vec<PendingTransaction>> {
        self.db.lock()?.list_pending()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PendingEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Contact book
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContactBook {
    db: SharedDatabase,
}

impl ContactBook {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn upsert(&self, peer_id: PeerId, payment_address: Address, language: String) -> Result<()> {
        let contact = Contact {
            peer_id,
            payment_address,
            language,
            updated_at: Utc::now().trunc_subsecs(6),
        };
        self.db.lock()?.upsert_contact(&contact)?;
        debug!(peer = %contact.peer_id, address = %contact.payment_address, "Updated contact");
        Ok(())
    }

    pub fn get(&self, peer_id: &PeerId) -> Result<Option<Contact>> {
        self.db.lock()?.get_contact(peer_id)
    }

    pub fn by_address(&self, address: &Address) -> Result<Option<Contact>> {
        self.db.lock()?.contact_by_address(address)
    }
}
