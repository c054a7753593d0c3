//! # sofa-store
//!
//! Local storage for the SOFA client, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with typed CRUD
//! helpers, and three shared handles built on top of it:
//! [`ConversationStore`] (chat messages and conversations, with a change
//! feed), [`PendingTransactionStore`] (in-flight transaction hashes) and
//! [`ContactBook`] (peer payment addresses). All three serialize writes
//! through one connection guarded by a mutex.

pub mod contacts;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pending;
pub mod store;

mod error;

pub use database::{Database, SharedDatabase};
pub use error::{Result, StoreError};
pub use models::*;
pub use store::{
    ContactBook, ConversationChange, ConversationEvent, ConversationStore, PendingEvent,
    PendingTransactionStore, ThreadEvents,
};
