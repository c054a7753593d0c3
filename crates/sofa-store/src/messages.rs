//! CRUD operations for [`ChatMessage`] records.
//!
//! Messages are keyed by their identity. Writing a message whose id already
//! exists replaces it in place, so repeated deliveries and status updates
//! never duplicate a row or double-count unread messages.

use rusqlite::{params, OptionalExtension};

use sofa_shared::{Kind, MessageId, PeerId, ThreadId};

use crate::conversations::{ensure_conversation, refresh_conversation};
use crate::database::{
    conversion_error, not_found, parse_timestamp, timestamp, Database, UnknownValue,
};
use crate::error::Result;
use crate::models::{ChatMessage, SendState, Upsert};

const COLUMNS: &str = "id, thread_id, created_at, kind, state, sender, payload, attachment, error";

impl Database {
    /// Insert the message, or replace the stored one with the same id.
    ///
    /// Only a newly inserted incoming message bumps the unread counter.
    /// A replaced message keeps its original thread and creation time.
    pub fn upsert_message(&self, thread: &ThreadId, message: &ChatMessage) -> Result<Upsert> {
        let tx = self.conn().unchecked_transaction()?;

        let existing_thread: Option<String> = tx
            .query_row(
                "SELECT thread_id FROM messages WHERE id = ?1",
                params![message.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let attachment = message
            .attachment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let (outcome, stored_thread) = match existing_thread {
            Some(stored) => {
                tx.execute(
                    "UPDATE messages
                     SET kind = ?2, state = ?3, sender = ?4, payload = ?5, attachment = ?6, error = ?7
                     WHERE id = ?1",
                    params![
                        message.id.as_str(),
                        kind_name(message.kind),
                        message.state.as_str(),
                        message.sender.as_str(),
                        message.payload,
                        attachment,
                        message.error,
                    ],
                )?;
                (Upsert::Replaced, stored.parse::<ThreadId>()?)
            }
            None => {
                ensure_conversation(&tx, thread, !message.is_incoming())?;
                tx.execute(
                    &format!(
                        "INSERT INTO messages ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        message.id.as_str(),
                        thread.to_string(),
                        timestamp(&message.created_at),
                        kind_name(message.kind),
                        message.state.as_str(),
                        message.sender.as_str(),
                        message.payload,
                        attachment,
                        message.error,
                    ],
                )?;
                (Upsert::Inserted, thread.clone())
            }
        };

        let unread = u32::from(outcome == Upsert::Inserted && message.is_incoming());
        refresh_conversation(&tx, &stored_thread, unread)?;

        tx.commit()?;
        Ok(outcome)
    }

    /// Overwrite an existing message. Returns the message's thread, or
    /// `None` when no message has that id; nothing is inserted. The
    /// conversation's activity time moves forward, its unread count does not.
    pub fn update_message(&self, message: &ChatMessage) -> Result<Option<ThreadId>> {
        let attachment = message
            .attachment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self.conn().unchecked_transaction()?;
        let affected = tx.execute(
            "UPDATE messages
             SET kind = ?2, state = ?3, sender = ?4, payload = ?5, attachment = ?6, error = ?7
             WHERE id = ?1",
            params![
                message.id.as_str(),
                kind_name(message.kind),
                message.state.as_str(),
                message.sender.as_str(),
                message.payload,
                attachment,
                message.error,
            ],
        )?;
        if affected == 0 {
            return Ok(None);
        }

        let thread: String = tx.query_row(
            "SELECT thread_id FROM messages WHERE id = ?1",
            params![message.id.as_str()],
            |row| row.get(0),
        )?;
        let thread = thread.parse::<ThreadId>()?;
        refresh_conversation(&tx, &thread, 0)?;
        tx.commit()?;
        Ok(Some(thread))
    }

    pub fn get_message(&self, id: &MessageId) -> Result<(ThreadId, ChatMessage)> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Messages of a thread, oldest first.
    pub fn messages_for_thread(
        &self,
        thread: &ThreadId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS}
             FROM messages
             WHERE thread_id = ?1
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![thread.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?.1);
        }
        Ok(messages)
    }

    pub fn count_messages(&self, thread: &ThreadId) -> Result<u32> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
            params![thread.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Delete a message. Returns its thread if it existed.
    pub fn delete_message(&self, id: &MessageId) -> Result<Option<ThreadId>> {
        let thread = match self.get_message(id) {
            Ok((thread, _)) => thread,
            Err(crate::StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        refresh_conversation(&tx, &thread, 0)?;
        tx.commit()?;
        Ok(Some(thread))
    }
}

pub(crate) fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::PlainText => "plain_text",
        Kind::Command => "command",
        Kind::PaymentRequest => "payment_request",
        Kind::Payment => "payment",
        Kind::Init => "init",
        Kind::InitRequest => "init_request",
        Kind::Timestamp => "timestamp",
        Kind::LocalStatusMessage => "local_status",
        Kind::Unknown => "unknown",
    }
}

fn parse_kind(s: &str) -> Option<Kind> {
    Some(match s {
        "plain_text" => Kind::PlainText,
        "command" => Kind::Command,
        "payment_request" => Kind::PaymentRequest,
        "payment" => Kind::Payment,
        "init" => Kind::Init,
        "init_request" => Kind::InitRequest,
        "timestamp" => Kind::Timestamp,
        "local_status" => Kind::LocalStatusMessage,
        "unknown" => Kind::Unknown,
        _ => return None,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ThreadId, ChatMessage)> {
    let id: String = row.get(0)?;
    let thread_str: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let state_str: String = row.get(4)?;
    let sender_str: String = row.get(5)?;
    let payload: String = row.get(6)?;
    let attachment_json: Option<String> = row.get(7)?;
    let error: Option<String> = row.get(8)?;

    let thread: ThreadId = thread_str.parse().map_err(|e| conversion_error(1, e))?;
    let kind = parse_kind(&kind_str).ok_or_else(|| conversion_error(3, UnknownValue(kind_str)))?;
    let state =
        SendState::parse(&state_str).ok_or_else(|| conversion_error(4, UnknownValue(state_str)))?;
    let sender = PeerId::new(sender_str).map_err(|e| conversion_error(5, e))?;
    let attachment = attachment_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| conversion_error(7, e))?;

    Ok((
        thread,
        ChatMessage {
            id: MessageId::from_raw(id),
            created_at: parse_timestamp(2, &created_str)?,
            kind,
            state,
            sender,
            payload,
            attachment,
            error,
        },
    ))
}
