//! In-memory collaborators with failure injection, for relay tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use parlor_shared::protocol::ServerEvent;
use parlor_shared::{Message, MessageId, ReceiptStatus, RoomId, UserId};

use crate::backend::{BackendError, MembershipOracle, MessageStore, UserStore};

#[derive(Default)]
struct Inner {
    members: HashSet<(UserId, RoomId)>,
    messages: Vec<Message>,
    receipts: Vec<(MessageId, UserId, ReceiptStatus)>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
    create_calls: usize,
    fail_creates: bool,
    fail_last_seen: bool,
    fail_receipts_for: HashSet<UserId>,
    membership_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.lock().unwrap())
    }

    pub fn add_member(&self, user_id: UserId, room_id: RoomId) {
        self.with(|i| i.members.insert((user_id, room_id)));
    }

    pub fn fail_creates(&self, fail: bool) {
        self.with(|i| i.fail_creates = fail);
    }

    pub fn fail_last_seen(&self, fail: bool) {
        self.with(|i| i.fail_last_seen = fail);
    }

    pub fn fail_receipts_for(&self, user_id: UserId) {
        self.with(|i| i.fail_receipts_for.insert(user_id));
    }

    pub fn delay_membership(&self, delay: Duration) {
        self.with(|i| i.membership_delay = Some(delay));
    }

    pub fn create_calls(&self) -> usize {
        self.with(|i| i.create_calls)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.with(|i| i.messages.clone())
    }

    pub fn receipts(&self) -> Vec<(MessageId, UserId, ReceiptStatus)> {
        self.with(|i| i.receipts.clone())
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.with(|i| i.last_seen.get(&user_id).copied())
    }
}

#[async_trait]
impl MembershipOracle for MemoryBackend {
    async fn is_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool, BackendError> {
        if let Some(delay) = self.with(|i| i.membership_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(self.with(|i| i.members.contains(&(user_id, room_id))))
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn create_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, BackendError> {
        self.with(|i| {
            i.create_calls += 1;
            if i.fail_creates {
                return Err(BackendError::Unavailable("injected create failure".into()));
            }
            let message = Message {
                id: MessageId::new(),
                room_id,
                sender_id,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            i.messages.push(message.clone());
            Ok(message)
        })
    }

    async fn upsert_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: ReceiptStatus,
    ) -> Result<(), BackendError> {
        self.with(|i| {
            if i.fail_receipts_for.contains(&user_id) {
                return Err(BackendError::Unavailable("injected receipt failure".into()));
            }
            let receipt = (message_id, user_id, status);
            if !i.receipts.contains(&receipt) {
                i.receipts.push(receipt);
            }
            Ok(())
        })
    }
}

#[async_trait]
impl UserStore for MemoryBackend {
    async fn set_last_seen(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), BackendError> {
        self.with(|i| {
            if i.fail_last_seen {
                return Err(BackendError::Unavailable("injected last-seen failure".into()));
            }
            i.last_seen.insert(user_id, at);
            Ok(())
        })
    }
}

/// Everything currently queued for a session.
pub fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
