//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `conversations`, `messages`,
//! `pending_transactions` and `contacts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    thread_id         TEXT PRIMARY KEY NOT NULL,  -- "peer:<id>" | "group:<id>"
    latest_message_id TEXT,
    unread_count      INTEGER NOT NULL DEFAULT 0,
    muted             INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    accepted          INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    updated_at        TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,  -- random UUID or tx hash
    thread_id  TEXT NOT NULL,              -- FK -> conversations(thread_id)
    created_at TEXT NOT NULL,
    kind       TEXT NOT NULL,
    state      TEXT NOT NULL,
    sender     TEXT NOT NULL,
    payload    TEXT NOT NULL,              -- envelope wire string
    attachment TEXT,                       -- JSON
    error      TEXT,

    FOREIGN KEY (thread_id) REFERENCES conversations(thread_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_thread_ts
    ON messages(thread_id, created_at);

-- ----------------------------------------------------------------
-- Pending transactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_transactions (
    hash          TEXT PRIMARY KEY NOT NULL,  -- 0x-prefixed tx hash
    thread_id     TEXT NOT NULL,
    message       TEXT NOT NULL,              -- JSON ChatMessage snapshot
    registered_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    peer_id         TEXT PRIMARY KEY NOT NULL,
    payment_address TEXT NOT NULL,
    language        TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contacts_address ON contacts(payment_address);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
