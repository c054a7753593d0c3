//! CRUD operations for [`Conversation`] records.

use chrono::Utc;
use rusqlite::{params, Connection};

use sofa_shared::{MessageId, ThreadId};

use crate::database::{conversion_error, not_found, parse_timestamp, timestamp, Database};
use crate::error::Result;
use crate::models::{Conversation, ConversationStatus};

const COLUMNS: &str = "thread_id, latest_message_id, unread_count, muted, accepted, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create the conversation if missing. `accept` also marks an existing
    /// conversation as accepted.
    pub fn ensure_conversation(&self, thread: &ThreadId, accept: bool) -> Result<()> {
        ensure_conversation(self.conn(), thread, accept)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, thread: &ThreadId) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM conversations WHERE thread_id = ?1"),
                params![thread.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    /// List all conversations, most recently active first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM conversations ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map([], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_conversation_muted(&self, thread: &ThreadId, muted: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET muted = ?2 WHERE thread_id = ?1",
            params![thread.to_string(), muted],
        )?;
        Ok(affected > 0)
    }

    pub fn accept_conversation(&self, thread: &ThreadId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET accepted = 1 WHERE thread_id = ?1",
            params![thread.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_conversation_read(&self, thread: &ThreadId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET unread_count = 0 WHERE thread_id = ?1",
            params![thread.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a conversation and, through the foreign key, its messages.
    pub fn delete_conversation(&self, thread: &ThreadId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversations WHERE thread_id = ?1",
            params![thread.to_string()],
        )?;
        Ok(affected > 0)
    }
}

pub(crate) fn ensure_conversation(conn: &Connection, thread: &ThreadId, accept: bool) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversations (thread_id, unread_count, muted, accepted, updated_at)
         VALUES (?1, 0, 0, ?2, ?3)",
        params![thread.to_string(), accept, timestamp(&Utc::now())],
    )?;
    if accept {
        conn.execute(
            "UPDATE conversations SET accepted = 1 WHERE thread_id = ?1",
            params![thread.to_string()],
        )?;
    }
    Ok(())
}

/// Recompute the cached latest message and bump the unread counter.
pub(crate) fn refresh_conversation(
    conn: &Connection,
    thread: &ThreadId,
    unread_delta: u32,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET latest_message_id = (
                 SELECT id FROM messages
                 WHERE thread_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1
             ),
             unread_count = unread_count + ?2,
             updated_at = ?3
         WHERE thread_id = ?1",
        params![thread.to_string(), unread_delta, timestamp(&Utc::now())],
    )?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let thread_str: String = row.get(0)?;
    let latest: Option<String> = row.get(1)?;
    let unread_count: u32 = row.get(2)?;
    let muted: bool = row.get(3)?;
    let accepted: bool = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let thread: ThreadId = thread_str.parse().map_err(|e| conversion_error(0, e))?;

    Ok(Conversation {
        thread,
        latest_message_id: latest.map(MessageId::from_raw),
        unread_count,
        status: ConversationStatus { muted, accepted },
        updated_at: parse_timestamp(5, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use sofa_shared::PeerId;

    fn thread(name: &str) -> ThreadId {
        ThreadId::Peer(PeerId::new(name).unwrap())
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let t = thread("alice");

        db.ensure_conversation(&t, false).unwrap();
        db.ensure_conversation(&t, false).unwrap();
        assert_eq!(db.list_conversations().unwrap().len(), 1);
        assert!(!db.get_conversation(&t).unwrap().status.accepted);

        db.ensure_conversation(&t, true).unwrap();
        assert!(db.get_conversation(&t).unwrap().status.accepted);
    }

    #[test]
    fn test_status_flags() {
        let db = Database::open_in_memory().unwrap();
        let t = thread("bob");
        db.ensure_conversation(&t, false).unwrap();

        assert!(db.set_conversation_muted(&t, true).unwrap());
        assert!(db.accept_conversation(&t).unwrap());
        let status = db.get_conversation(&t).unwrap().status;
        assert!(status.muted && status.accepted);

        assert!(!db.set_conversation_muted(&thread("nobody"), true).unwrap());
    }

    #[test]
    fn test_missing_conversation_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_conversation(&thread("ghost")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_delete_conversation() {
        let db = Database::open_in_memory().unwrap();
        let t = thread("carol");
        db.ensure_conversation(&t, true).unwrap();
        assert!(db.delete_conversation(&t).unwrap());
        assert!(!db.delete_conversation(&t).unwrap());
    }
}
