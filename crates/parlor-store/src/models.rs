//! Domain model structs persisted in the SQLite database.
//!
//! Structs that leave the server over HTTP derive `Serialize` with
//! camelCase field names to match the wire protocol.

use chrono::{DateTime, Utc};
use serde::Serialize;

use parlor_shared::{Message, MessageId, ReceiptStatus, RoomId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Login email, unique across accounts.
    pub email: String,
    /// Argon2 PHC string. Never serialized.
    pub password_hash: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    /// Set whenever the user's last live connection closes.
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// The public view of a [`User`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    /// Present only for private rooms.
    pub invite_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: ReceiptStatus,
    pub created_at: DateTime<Utc>,
}

/// A history entry: the message plus every receipt recorded for it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageWithReceipts {
    #[serde(flatten)]
    pub message: Message,
    pub receipts: Vec<Receipt>,
}
