//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `rooms`, `room_members`,
//! `messages`, and `message_receipts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- argon2 PHC string
    display_name  TEXT NOT NULL,
    created_at    TEXT NOT NULL,               -- RFC-3339
    last_seen_at  TEXT
);

-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name        TEXT NOT NULL,
    is_private  INTEGER NOT NULL DEFAULT 0,
    invite_code TEXT UNIQUE,
    created_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Room membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_members (
    user_id   TEXT NOT NULL,                   -- FK -> users(id)
    room_id   TEXT NOT NULL,                   -- FK -> rooms(id)
    joined_at TEXT NOT NULL,

    PRIMARY KEY (user_id, room_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_room_members_room ON room_members(room_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT, -- insertion order
    id         TEXT NOT NULL UNIQUE,              -- UUID v4
    room_id    TEXT NOT NULL,                     -- FK -> rooms(id)
    sender_id  TEXT NOT NULL,                     -- FK -> users(id)
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages(room_id, seq DESC);

-- ----------------------------------------------------------------
-- Delivery / read receipts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_receipts (
    message_id TEXT NOT NULL,                  -- FK -> messages(id)
    user_id    TEXT NOT NULL,                  -- FK -> users(id)
    status     TEXT NOT NULL,                  -- DELIVERED | READ
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id, status),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
