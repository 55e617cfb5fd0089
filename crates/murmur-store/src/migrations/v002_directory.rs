//! v002 -- Directory, catalog and call history tables.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    id     TEXT PRIMARY KEY NOT NULL,
    name   TEXT NOT NULL,
    avatar TEXT,
    about  TEXT,
    is_bot INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS products (
    id          TEXT PRIMARY KEY NOT NULL,
    seller_id   TEXT NOT NULL,
    title       TEXT NOT NULL,
    description TEXT NOT NULL,
    price       REAL NOT NULL,
    currency    TEXT NOT NULL,
    image_url   TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS spaces (
    id           TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    description  TEXT NOT NULL,
    member_count INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_transactions (
    id              TEXT PRIMARY KEY NOT NULL,
    counterparty_id TEXT NOT NULL,
    amount          REAL NOT NULL,
    currency        TEXT NOT NULL,
    direction       TEXT NOT NULL,           -- incoming / outgoing
    note            TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stories (
    id         TEXT PRIMARY KEY NOT NULL,
    author_id  TEXT NOT NULL,
    media_url  TEXT NOT NULL,
    caption    TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS call_logs (
    id             TEXT PRIMARY KEY NOT NULL,
    participant_id TEXT NOT NULL,
    media          TEXT NOT NULL,            -- audio / video
    outgoing       INTEGER NOT NULL,
    started_at     TEXT NOT NULL,
    duration_secs  INTEGER NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
