//! v001 -- Initial schema creation.
//!
//! Creates the chat tables: `sessions` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    id           TEXT PRIMARY KEY NOT NULL,
    participant  TEXT NOT NULL,               -- JSON Participant
    unread       INTEGER NOT NULL DEFAULT 0,
    pinned       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    disappearing INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    wallpaper    TEXT,
    last_message TEXT,
    last_time    TEXT,                        -- RFC-3339
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages (rowid order = insertion order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- client-assigned id
    session_id TEXT NOT NULL,                 -- FK -> sessions(id)
    sender_id  TEXT NOT NULL,
    text       TEXT,
    kind       TEXT NOT NULL,
    metadata   TEXT NOT NULL,                 -- JSON, kind-specific
    created_at TEXT NOT NULL,
    status     TEXT NOT NULL,
    expires_at TEXT,
    reply_to   TEXT,                          -- JSON ReplyRef
    reactions  TEXT NOT NULL DEFAULT '[]',    -- JSON [Reaction]
    starred    INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session
    ON messages(session_id);

CREATE INDEX IF NOT EXISTS idx_messages_expiry
    ON messages(expires_at) WHERE expires_at IS NOT NULL;
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
