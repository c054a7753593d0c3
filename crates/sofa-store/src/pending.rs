//! CRUD operations for [`PendingTransaction`] records.

use rusqlite::params;

use sofa_shared::{ThreadId, TxHash};

use crate::database::{conversion_error, not_found, parse_timestamp, timestamp, Database};
use crate::error::Result;
use crate::models::{ChatMessage, PendingTransaction};

impl Database {
    /// Track a transaction. Registering the same hash again replaces the entry.
    pub fn insert_pending(&self, pending: &PendingTransaction) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_transactions (hash, thread_id, message, registered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                pending.hash.as_str(),
                pending.thread.to_string(),
                serde_json::to_string(&pending.message)?,
                timestamp(&pending.registered_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_pending(&self, hash: &TxHash) -> Result<PendingTransaction> {
        self.conn()
            .query_row(
                "SELECT hash, thread_id, message, registered_at
                 FROM pending_transactions WHERE hash = ?1",
                params![hash.as_str()],
                row_to_pending,
            )
            .map_err(not_found)
    }

    /// All tracked transactions, oldest registration first.
    pub fn list_pending(&self) -> Result<Vec<PendingTransaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT hash, thread_id, message, registered_at
             FROM pending_transactions
             ORDER BY registered_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_pending)?;

        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        Ok(pending)
    }

    /// Replace the message snapshot of a tracked transaction.
    pub fn update_pending_message(&self, hash: &TxHash, message: &ChatMessage) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE pending_transactions SET message = ?2 WHERE hash = ?1",
            params![hash.as_str(), serde_json::to_string(message)?],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_pending(&self, hash: &TxHash) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM pending_transactions WHERE hash = ?1",
            params![hash.as_str()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingTransaction> {
    let hash_str: String = row.get(0)?;
    let thread_str: String = row.get(1)?;
    let message_json: String = row.get(2)?;
    let registered_str: String = row.get(3)?;

    Ok(PendingTransaction {
        hash: TxHash::parse(&hash_str).map_err(|e| conversion_error(0, e))?,
        thread: thread_str
            .parse::<ThreadId>()
            .map_err(|e| conversion_error(1, e))?,
        message: serde_json::from_str(&message_json).map_err(|e| conversion_error(2, e))?,
        registered_at: parse_timestamp(3, &registered_str)?,
    })
}
