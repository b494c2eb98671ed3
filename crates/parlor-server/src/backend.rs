//! Storage collaborators consumed by the relay.
//!
//! The relay only sees the three narrow traits below. [`SqliteBackend`]
//! implements all of them over a [`parlor_store::Database`], running every
//! query on tokio's blocking pool so no async worker is ever parked on
//! SQLite.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use parlor_shared::{Message, MessageId, ReceiptStatus, RoomId, UserId};
use parlor_store::{Database, StoreError};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, BackendError>;

    /// Idempotent: at most one receipt per (message, user, status).
    async fn upsert_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: ReceiptStatus,
    ) -> Result<(), BackendError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn set_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// SQLite adapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteBackend {
    db: Arc<Mutex<Database>>,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> parlor_store::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| BackendError::Unavailable("database lock poisoned".into()))?;
            f(&guard).map_err(BackendError::from)
        })
        .await
        .map_err(|e| BackendError::Task(e.to_string()))?
    }
}

#[async_trait]
impl MembershipOracle for SqliteBackend {
    async fn is_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool, BackendError> {
        self.run(move |db| db.is_member(user_id, room_id)).await
    }
}

#[async_trait]
impl MessageStore for SqliteBackend {
    async fn create_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, BackendError> {
        let content = content.to_string();
        self.run(move |db| db.insert_message(room_id, sender_id, &content))
            .await
    }

    async fn upsert_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: ReceiptStatus,
    ) -> Result<(), BackendError> {
        self.run(move |db| db.upsert_receipt(message_id, user_id, status))
            .await
    }
}

#[async_trait]
impl UserStore for SqliteBackend {
    async fn set_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), BackendError> {
        self.run(move |db| db.set_last_seen(user_id, at)).await
    }
}
