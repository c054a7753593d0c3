//! Domain model structs persisted in the local database.
//!
//! Relationships are id references (a message names its thread, a pending
//! transaction carries a message snapshot); nothing holds a live object graph.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use sofa_shared::{
    Address, Kind, MessageId, ParseError, PeerId, Sofa, ThreadId, TxHash, ValidationError,
};

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendState {
    Sending,
    Pending,
    Sent,
    Received,
    Failed,
}

impl SendState {
    pub fn as_str(self) -> &'static str {
        match self {
            SendState::Sending => "sending",
            SendState::Pending => "pending",
            SendState::Sent => "sent",
            SendState::Received => "received",
            SendState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sending" => SendState::Sending,
            "pending" => SendState::Pending,
            "sent" => SendState::Sent,
            "received" => SendState::Received,
            "failed" => SendState::Failed,
            _ => return None,
        })
    }
}

/// Reference to a file shipped alongside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub file_size: u64,
    /// BLAKE3 content hash (hex string).
    pub blake3_hash: String,
    /// Where the file lives on disk, once downloaded.
    pub local_path: Option<String>,
}

/// One stored unit of a conversation. Two messages with the same `id` are
/// the same logical message: writes replace, never append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub kind: Kind,
    pub state: SendState,
    pub sender: PeerId,
    /// Full envelope wire string, local-only fields included.
    pub payload: String,
    pub attachment: Option<Attachment>,
    /// Human-readable reason attached to a failed message.
    pub error: Option<String>,
}

impl ChatMessage {
    /// A message authored locally, ready to be queued.
    pub fn outgoing(sender: PeerId, sofa: &Sofa) -> Result<Self, ValidationError> {
        Ok(Self {
            id: MessageId::new(),
            // The database keeps microseconds.
            created_at: Utc::now().trunc_subsecs(6),
            kind: sofa.kind(),
            state: SendState::Sending,
            sender,
            payload: sofa.encode()?,
            attachment: None,
            error: None,
        })
    }

    /// A message that arrived from `sender`.
    pub fn incoming(sender: PeerId, sofa: &Sofa) -> Result<Self, ValidationError> {
        let mut message = Self::outgoing(sender, sofa)?;
        message.state = SendState::Received;
        Ok(message)
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn is_incoming(&self) -> bool {
        self.state == SendState::Received
    }

    pub fn sofa(&self) -> Result<Sofa, ParseError> {
        Sofa::decode(&self.payload)
    }

    /// Replace the envelope, keeping identity and metadata.
    pub fn set_sofa(&mut self, sofa: &Sofa) -> Result<(), ValidationError> {
        self.payload = sofa.encode()?;
        self.kind = sofa.kind();
        Ok(())
    }

    pub fn mark(&mut self, state: SendState, error: Option<String>) {
        self.state = state;
        self.error = error;
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConversationStatus {
    pub muted: bool,
    /// `false` while the conversation is a request from an unknown peer.
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub thread: ThreadId,
    pub latest_message_id: Option<MessageId>,
    pub unread_count: u32,
    pub status: ConversationStatus,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

// ---------------------------------------------------------------------------
// PendingTransaction
// ---------------------------------------------------------------------------

/// A submitted or observed transaction that has not reached a terminal
/// on-chain status yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub thread: ThreadId,
    /// Snapshot of the associated message at registration time.
    pub message: ChatMessage,
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// What a peer told us about itself in an Init envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub peer_id: PeerId,
    pub payment_address: Address,
    pub language: String,
    pub updated_at: DateTime<Utc>,
}
