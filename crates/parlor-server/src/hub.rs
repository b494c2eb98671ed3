//! The relay coordinator.
//!
//! [`RelayHub`] owns all mutable relay state (presence, rate-limit buckets
//! and the outbound queue of every live session) behind one mutex. Storage
//! collaborators are always awaited with that mutex released, and every
//! such call is bounded by the configured store timeout.
//!
//! Fan-out happens while the mutex is held, so events reach each session's
//! queue in the order the hub processed them.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use parlor_shared::constants::DEFAULT_STORE_TIMEOUT_MS;
use parlor_shared::protocol::{ReceivedMessage, RoomRef, ServerEvent, TypingNotice};
use parlor_shared::{Message, ReceiptStatus, RoomId, SessionId, UserId};

use crate::backend::{BackendError, MembershipOracle, MessageStore, UserStore};
use crate::error::RelayError;
use crate::presence::PresenceRegistry;
use crate::rate_limit::SlidingWindowLimiter;

/// Queue feeding one connection's socket writer.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Upper bound on any single collaborator call.
    pub store_timeout: Duration,
    /// Gate `typing` on room membership.
    pub typing_requires_membership: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            typing_requires_membership: false,
        }
    }
}

struct HubState {
    presence: PresenceRegistry,
    limiter: SlidingWindowLimiter<(UserId, RoomId)>,
    outbound: HashMap<SessionId, Outbound>,
}

impl HubState {
    fn send_to(&self, session_id: SessionId, event: ServerEvent) {
        let Some(tx) = self.outbound.get(&session_id) else {
            return;
        };
        if tx.send(event).is_err() {
            debug!(session = %session_id, "Dropping event for closed session");
        }
    }

    fn broadcast_room(&self, room_id: RoomId, event: &ServerEvent, except: Option<SessionId>) {
        for session_id in self.presence.sessions_in(room_id) {
            if Some(session_id) != except {
                self.send_to(session_id, event.clone());
            }
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        for session_id in self.outbound.keys() {
            self.send_to(*session_id, event.clone());
        }
    }
}

pub struct RelayHub {
    state: Mutex<HubState>,
    membership: Arc<dyn MembershipOracle>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    settings: HubSettings,
}

impl RelayHub {
    pub fn new(
        membership: Arc<dyn MembershipOracle>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        settings: HubSettings,
    ) -> Self {
        Self {
            state: Mutex::new(HubState {
                presence: PresenceRegistry::new(),
                limiter: SlidingWindowLimiter::default(),
                outbound: HashMap::new(),
            }),
            membership,
            messages,
            users,
            settings,
        }
    }

    /// Build a hub whose three collaborators are the same backend.
    pub fn with_backend<B>(backend: B, settings: HubSettings) -> Self
    where
        B: MembershipOracle + MessageStore + UserStore + 'static,
    {
        let backend = Arc::new(backend);
        Self::new(backend.clone(), backend.clone(), backend, settings)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Register a freshly authenticated connection.
    ///
    /// When this is the user's first live session, every connected client is
    /// told the user is online.
    pub async fn connect(&self, user_id: UserId, outbound: Outbound) -> SessionId {
        let session_id = SessionId::new();
        let mut state = self.state.lock().await;

        state.outbound.insert(session_id, outbound);
        let came_online = state.presence.register_connection(user_id, session_id);
        if came_online {
            state.broadcast_all(&ServerEvent::online(user_id));
        }

        info!(
            user = %user_id,
            session = %session_id,
            came_online,
            sessions = state.outbound.len(),
            "Session connected"
        );
        session_id
    }

    /// Tear down a session.
    ///
    /// Every room the user no longer has a live session in receives one
    /// offline status carrying the last-seen time. Persisting last-seen is
    /// best effort.
    pub async fn disconnect(&self, session_id: SessionId, user_id: UserId) {
        let last_seen = Utc::now();

        let departure = {
            let mut state = self.state.lock().await;
            state.outbound.remove(&session_id);
            let departure = state.presence.remove_connection(user_id, session_id);

            let offline = ServerEvent::offline(user_id, last_seen);
            for room_id in &departure.vacated_rooms {
                state.broadcast_room(*room_id, &offline, None);
            }
            departure
        };

        info!(
            user = %user_id,
            session = %session_id,
            last_session = departure.was_last_session,
            vacated_rooms = departure.vacated_rooms.len(),
            "Session disconnected"
        );

        if let Err(e) = self
            .bounded("set last seen", self.users.set_last_seen(user_id, last_seen))
            .await
        {
            warn!(user = %user_id, error = %e, "Failed to persist last-seen time");
        }
    }

    // -----------------------------------------------------------------------
    // Room-scoped events
    // -----------------------------------------------------------------------

    pub async fn join_room(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), RelayError> {
        self.require_membership(user_id, room_id).await?;

        let mut state = self.state.lock().await;
        if !state.presence.join_room(session_id, user_id, room_id) {
            return Err(RelayError::SessionClosed);
        }
        state.broadcast_room(room_id, &ServerEvent::online(user_id), None);
        state.send_to(session_id, ServerEvent::JoinedRoom(RoomRef { room_id }));

        debug!(user = %user_id, room = %room_id, "Joined room");
        Ok(())
    }

    pub async fn leave_room(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        let vacated = state.presence.leave_room(session_id, user_id, room_id);
        state.send_to(session_id, ServerEvent::LeftRoom(RoomRef { room_id }));

        debug!(user = %user_id, room = %room_id, vacated, "Left room");
        Ok(())
    }

    /// Relay a typing indicator to every other session in the room.
    pub async fn typing(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: RoomId,
        is_typing: bool,
    ) -> Result<(), RelayError> {
        if self.settings.typing_requires_membership {
            self.require_membership(user_id, room_id).await?;
        }

        let event = ServerEvent::Typing(TypingNotice {
            user_id,
            room_id,
            is_typing,
        });
        self.state
            .lock()
            .await
            .broadcast_room(room_id, &event, Some(session_id));
        Ok(())
    }

    /// Validate, admit, persist and fan out one message.
    ///
    /// Every live member of the room other than the sender gets a DELIVERED
    /// receipt. A failed receipt write is logged and affects nobody else.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<Message, RelayError> {
        if content.trim().is_empty() {
            return Err(RelayError::Validation("Empty message".into()));
        }

        // The slot is spent here even if a later step fails.
        let admitted = self
            .state
            .lock()
            .await
            .limiter
            .admit((user_id, room_id), Instant::now());
        if !admitted {
            debug!(user = %user_id, room = %room_id, "Message rate limited");
            return Err(RelayError::RateLimited);
        }

        self.require_membership(user_id, room_id).await?;

        let message = self
            .bounded(
                "create message",
                self.messages.create_message(room_id, user_id, content),
            )
            .await
            .map_err(|e| {
                warn!(user = %user_id, room = %room_id, error = %e, "Failed to persist message");
                RelayError::Persistence(e.to_string())
            })?;

        let recipients: Vec<UserId> = {
            let state = self.state.lock().await;
            let recipients = state
                .presence
                .live_members_of(room_id)
                .into_iter()
                .filter(|member| *member != user_id)
                .collect();
            state.broadcast_room(
                room_id,
                &ServerEvent::ReceiveMessage(ReceivedMessage {
                    message: message.clone(),
                }),
                None,
            );
            recipients
        };

        let message_id = message.id;
        let receipts = recipients.iter().map(|recipient| {
            let recipient = *recipient;
            async move {
                let result = self
                    .bounded(
                        "upsert receipt",
                        self.messages
                            .upsert_receipt(message_id, recipient, ReceiptStatus::Delivered),
                    )
                    .await;
                if let Err(e) = result {
                    warn!(
                        message = %message_id,
                        recipient = %recipient,
                        error = %e,
                        "Failed to record delivery receipt"
                    );
                }
            }
        });
        join_all(receipts).await;

        debug!(
            session = %session_id,
            message = %message.id,
            room = %room_id,
            recipients = recipients.len(),
            "Message relayed"
        );
        Ok(message)
    }

    // -----------------------------------------------------------------------
    // Maintenance and introspection
    // -----------------------------------------------------------------------

    /// Evict rate-limit buckets that have been quiet for a whole window.
    pub async fn purge_idle_buckets(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.limiter.purge_idle(Instant::now());
        if removed > 0 {
            debug!(
                removed,
                remaining = state.limiter.tracked_keys(),
                "Purged idle message rate-limit buckets"
            );
        }
        removed
    }

    pub async fn live_members_of(&self, room_id: RoomId) -> HashSet<UserId> {
        self.state.lock().await.presence.live_members_of(room_id)
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().await.presence.is_online(user_id)
    }

    pub async fn online_users(&self) -> usize {
        self.state.lock().await.presence.online_users()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.presence.session_count()
    }

    // -----------------------------------------------------------------------
    // Collaborator calls
    // -----------------------------------------------------------------------

    async fn require_membership(&self, user_id: UserId, room_id: RoomId) -> Result<(), RelayError> {
        let is_member = self
            .bounded("membership lookup", self.membership.is_member(user_id, room_id))
            .await
            .map_err(|e| {
                warn!(user = %user_id, room = %room_id, error = %e, "Membership lookup failed");
                RelayError::Lookup(e.to_string())
            })?;

        if is_member {
            Ok(())
        } else {
            Err(RelayError::MembershipDenied)
        }
    }

    async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.settings.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Unavailable(format!(
                "{what} timed out after {}ms",
                self.settings.store_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, MemoryBackend};
    use parlor_shared::protocol::{Presence, UserStatus};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn hub_with(backend: &MemoryBackend) -> RelayHub {
        RelayHub::with_backend(backend.clone(), HubSettings::default())
    }

    async fn connect(hub: &RelayHub, user: UserId) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.connect(user, tx).await, rx)
    }

    fn received_messages(events: &[ServerEvent]) -> Vec<&Message> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage(m) => Some(&m.message),
                _ => None,
            })
            .collect()
    }

    fn statuses(events: &[ServerEvent]) -> Vec<&UserStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::UserStatus(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_online_broadcast_only_for_first_session() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let (alice, bob) = (UserId::new(), UserId::new());

        let (_, mut bob_rx) = connect(&hub, bob).await;
        drain(&mut bob_rx);

        let _a1 = connect(&hub, alice).await;
        let _a2 = connect(&hub, alice).await;

        let seen = drain(&mut bob_rx);
        assert_eq!(seen, vec![ServerEvent::online(alice)]);
        assert!(hub.is_online(alice).await);
        assert_eq!(hub.session_count().await, 3);
    }

    #[tokio::test]
    async fn test_join_as_non_member_changes_nothing() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, mallory) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);

        let (a, mut alice_rx) = connect(&hub, alice).await;
        hub.join_room(a, alice, room).await.unwrap();
        let (m, mut mallory_rx) = connect(&hub, mallory).await;
        drain(&mut alice_rx);
        drain(&mut mallory_rx);

        let err = hub.join_room(m, mallory, room).await.unwrap_err();
        assert_eq!(err, RelayError::MembershipDenied);
        assert_eq!(hub.live_members_of(room).await, HashSet::from([alice]));
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut mallory_rx).is_empty());
    }

    #[tokio::test]
    async fn test_join_announces_to_room_and_acknowledges() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (a, mut alice_rx) = connect(&hub, alice).await;
        hub.join_room(a, alice, room).await.unwrap();
        let (b, mut bob_rx) = connect(&hub, bob).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.join_room(b, bob, room).await.unwrap();

        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::online(bob)]);
        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEvent::online(bob),
                ServerEvent::JoinedRoom(RoomRef { room_id: room }),
            ]
        );
    }

    #[tokio::test]
    async fn test_hello_reaches_room_with_receipt_and_echo() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (a, mut alice_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(a, alice, room).await.unwrap();
        hub.join_room(b, bob, room).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let sent = hub.send_message(a, alice, room, "hello").await.unwrap();

        let bob_events = drain(&mut bob_rx);
        let bob_got = received_messages(&bob_events);
        assert_eq!(bob_got.len(), 1);
        assert_eq!(bob_got[0].content, "hello");
        assert_eq!(bob_got[0].sender_id, alice);

        let alice_events = drain(&mut alice_rx);
        assert_eq!(received_messages(&alice_events), vec![&sent]);

        assert_eq!(
            backend.receipts(),
            vec![(sent.id, bob, ReceiptStatus::Delivered)]
        );
    }

    #[tokio::test]
    async fn test_receipts_for_every_other_live_member() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let sender = UserId::new();
        backend.add_member(sender, room);

        let (s, mut sender_rx) = connect(&hub, sender).await;
        hub.join_room(s, sender, room).await.unwrap();

        let mut others = Vec::new();
        for _ in 0..3 {
            let user = UserId::new();
            backend.add_member(user, room);
            let (session, rx) = connect(&hub, user).await;
            hub.join_room(session, user, room).await.unwrap();
            others.push((user, rx));
        }
        // Online but not in the room: no receipt, no broadcast.
        let outsider = UserId::new();
        backend.add_member(outsider, room);
        let (_, mut outsider_rx) = connect(&hub, outsider).await;
        drain(&mut outsider_rx);

        let sent = hub.send_message(s, sender, room, "hi all").await.unwrap();

        let mut receipts = backend.receipts();
        receipts.sort_by_key(|(_, user, _)| *user);
        let mut expected: Vec<_> = others
            .iter()
            .map(|(user, _)| (sent.id, *user, ReceiptStatus::Delivered))
            .collect();
        expected.sort_by_key(|(_, user, _)| *user);
        assert_eq!(receipts, expected);

        assert_eq!(received_messages(&drain(&mut sender_rx)).len(), 1);
        for (_, rx) in &mut others {
            assert_eq!(received_messages(&drain(rx)).len(), 1);
        }
        assert!(received_messages(&drain(&mut outsider_rx)).is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_never_reaches_store() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let alice = UserId::new();
        backend.add_member(alice, room);
        let (a, _rx) = connect(&hub, alice).await;

        for content in ["", "   ", "\n\t "] {
            let err = hub.send_message(a, alice, room, content).await.unwrap_err();
            assert_eq!(err, RelayError::Validation("Empty message".into()));
        }
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_sixth_rapid_message_is_rate_limited() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let alice = UserId::new();
        backend.add_member(alice, room);
        let (a, mut alice_rx) = connect(&hub, alice).await;
        hub.join_room(a, alice, room).await.unwrap();
        drain(&mut alice_rx);

        for i in 0..5 {
            hub.send_message(a, alice, room, &format!("msg {i}"))
                .await
                .unwrap();
        }
        let err = hub.send_message(a, alice, room, "msg 5").await.unwrap_err();

        assert_eq!(err, RelayError::RateLimited);
        assert_eq!(backend.create_calls(), 5);
        assert_eq!(received_messages(&drain(&mut alice_rx)).len(), 5);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_room() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let (r1, r2) = (RoomId::new(), RoomId::new());
        let alice = UserId::new();
        backend.add_member(alice, r1);
        backend.add_member(alice, r2);
        let (a, _rx) = connect(&hub, alice).await;

        for _ in 0..5 {
            hub.send_message(a, alice, r1, "x").await.unwrap();
        }
        assert_eq!(
            hub.send_message(a, alice, r1, "x").await,
            Err(RelayError::RateLimited)
        );
        assert!(hub.send_message(a, alice, r2, "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_persist_is_not_broadcast_but_spends_budget() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let alice = UserId::new();
        backend.add_member(alice, room);
        let (a, mut alice_rx) = connect(&hub, alice).await;
        hub.join_room(a, alice, room).await.unwrap();
        drain(&mut alice_rx);

        backend.fail_creates(true);
        let err = hub.send_message(a, alice, room, "lost").await.unwrap_err();
        assert!(matches!(err, RelayError::Persistence(_)));
        assert_eq!(err.client_message(), "Failed to send message");
        assert!(drain(&mut alice_rx).is_empty());

        backend.fail_creates(false);
        for _ in 0..4 {
            hub.send_message(a, alice, room, "ok").await.unwrap();
        }
        assert_eq!(
            hub.send_message(a, alice, room, "one too many").await,
            Err(RelayError::RateLimited)
        );
    }

    #[tokio::test]
    async fn test_non_member_send_is_not_persisted() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let mallory = UserId::new();
        let (m, _rx) = connect(&hub, mallory).await;

        assert_eq!(
            hub.send_message(m, mallory, room, "spam").await,
            Err(RelayError::MembershipDenied)
        );
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_receipt_does_not_affect_others() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let mut receivers = Vec::new();
        let mut sessions = HashMap::new();
        for user in [alice, bob, carol] {
            backend.add_member(user, room);
            let (session, rx) = connect(&hub, user).await;
            hub.join_room(session, user, room).await.unwrap();
            sessions.insert(user, session);
            receivers.push(rx);
        }
        backend.fail_receipts_for(bob);

        let sent = hub
            .send_message(sessions[&alice], alice, room, "hey")
            .await
            .unwrap();

        assert_eq!(
            backend.receipts(),
            vec![(sent.id, carol, ReceiptStatus::Delivered)]
        );
        for rx in &mut receivers {
            assert_eq!(received_messages(&drain(rx)).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_disconnect_announces_offline_once_and_records_last_seen() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (a, _alice_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(a, alice, room).await.unwrap();
        hub.join_room(b, bob, room).await.unwrap();
        drain(&mut bob_rx);

        hub.disconnect(a, alice).await;

        let events = drain(&mut bob_rx);
        let offline: Vec<_> = statuses(&events)
            .into_iter()
            .filter(|s| s.user_id == alice && s.status == Presence::Offline)
            .collect();
        assert_eq!(offline.len(), 1);
        let last_seen = offline[0].last_seen_at.expect("offline carries last seen");
        assert_eq!(backend.last_seen(alice), Some(last_seen));

        assert!(!hub.is_online(alice).await);
        assert_eq!(hub.live_members_of(room).await, HashSet::from([bob]));
    }

    #[tokio::test]
    async fn test_partial_disconnect_keeps_user_online() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (phone, _p) = connect(&hub, alice).await;
        let (laptop, _l) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(phone, alice, room).await.unwrap();
        hub.join_room(laptop, alice, room).await.unwrap();
        hub.join_room(b, bob, room).await.unwrap();
        drain(&mut bob_rx);

        hub.disconnect(phone, alice).await;
        assert!(hub.is_online(alice).await);
        assert!(hub.live_members_of(room).await.contains(&alice));
        assert!(statuses(&drain(&mut bob_rx)).is_empty());

        hub.disconnect(laptop, alice).await;
        assert!(!hub.is_online(alice).await);
        assert_eq!(statuses(&drain(&mut bob_rx)).len(), 1);
    }

    #[tokio::test]
    async fn test_last_seen_failure_does_not_block_teardown() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);
        backend.fail_last_seen(true);

        let (a, _alice_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(a, alice, room).await.unwrap();
        hub.join_room(b, bob, room).await.unwrap();
        drain(&mut bob_rx);

        hub.disconnect(a, alice).await;

        assert_eq!(statuses(&drain(&mut bob_rx)).len(), 1);
        assert_eq!(backend.last_seen(alice), None);
        assert_eq!(hub.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_typing_skips_sending_session_only() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (phone, mut phone_rx) = connect(&hub, alice).await;
        let (laptop, mut laptop_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        for (session, user) in [(phone, alice), (laptop, alice), (b, bob)] {
            hub.join_room(session, user, room).await.unwrap();
        }
        drain(&mut phone_rx);
        drain(&mut laptop_rx);
        drain(&mut bob_rx);

        hub.typing(phone, alice, room, true).await.unwrap();

        let expected = ServerEvent::Typing(TypingNotice {
            user_id: alice,
            room_id: room,
            is_typing: true,
        });
        assert!(drain(&mut phone_rx).is_empty());
        assert_eq!(drain(&mut laptop_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut bob_rx), vec![expected]);
    }

    #[tokio::test]
    async fn test_typing_membership_gate_is_optional() {
        let backend = MemoryBackend::default();
        let room = RoomId::new();
        let (bob, mallory) = (UserId::new(), UserId::new());
        backend.add_member(bob, room);

        let open = hub_with(&backend);
        let (b, mut bob_rx) = connect(&open, bob).await;
        open.join_room(b, bob, room).await.unwrap();
        let (m, _) = connect(&open, mallory).await;
        drain(&mut bob_rx);
        open.typing(m, mallory, room, true).await.unwrap();
        assert_eq!(drain(&mut bob_rx).len(), 1);

        let gated = RelayHub::with_backend(
            backend.clone(),
            HubSettings {
                typing_requires_membership: true,
                ..HubSettings::default()
            },
        );
        let (b, mut bob_rx) = connect(&gated, bob).await;
        gated.join_room(b, bob, room).await.unwrap();
        let (m, _) = connect(&gated, mallory).await;
        drain(&mut bob_rx);
        assert_eq!(
            gated.typing(m, mallory, room, true).await,
            Err(RelayError::MembershipDenied)
        );
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_slow_membership_lookup_times_out() {
        let backend = MemoryBackend::default();
        let room = RoomId::new();
        let alice = UserId::new();
        backend.add_member(alice, room);
        backend.delay_membership(Duration::from_millis(200));

        let hub = RelayHub::with_backend(
            backend.clone(),
            HubSettings {
                store_timeout: Duration::from_millis(20),
                ..HubSettings::default()
            },
        );
        let (a, _rx) = connect(&hub, alice).await;

        let err = hub.join_room(a, alice, room).await.unwrap_err();
        assert!(matches!(err, RelayError::Lookup(_)));
        assert!(hub.live_members_of(room).await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_lookup_does_not_stall_other_sessions() {
        let backend = MemoryBackend::default();
        let hub = Arc::new(hub_with(&backend));
        let room = RoomId::new();
        let (alice, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (a, _alice_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(b, bob, room).await.unwrap();
        drain(&mut bob_rx);

        backend.delay_membership(Duration::from_millis(200));
        let pending = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.join_room(a, alice, room).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        let quick = Duration::from_millis(20);
        let (tx, _carol_rx) = mpsc::unbounded_channel();
        tokio::time::timeout(quick, hub.connect(carol, tx))
            .await
            .expect("connect stalled behind membership lookup");
        tokio::time::timeout(quick, hub.typing(b, bob, room, true))
            .await
            .expect("typing stalled behind membership lookup")
            .unwrap();
        let sessions = tokio::time::timeout(quick, hub.session_count())
            .await
            .expect("session_count stalled behind membership lookup");
        assert_eq!(sessions, 3);

        pending.await.unwrap().unwrap();
        assert!(hub.live_members_of(room).await.contains(&alice));
    }

    #[tokio::test]
    async fn test_leave_room_stops_fan_out() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        backend.add_member(alice, room);
        backend.add_member(bob, room);

        let (a, _alice_rx) = connect(&hub, alice).await;
        let (b, mut bob_rx) = connect(&hub, bob).await;
        hub.join_room(a, alice, room).await.unwrap();
        hub.join_room(b, bob, room).await.unwrap();

        hub.leave_room(b, bob, room).await.unwrap();
        assert_eq!(
            drain(&mut bob_rx).last(),
            Some(&ServerEvent::LeftRoom(RoomRef { room_id: room }))
        );

        hub.send_message(a, alice, room, "anyone?").await.unwrap();
        assert!(received_messages(&drain(&mut bob_rx)).is_empty());
        assert!(backend.receipts().is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_buckets() {
        let backend = MemoryBackend::default();
        let hub = hub_with(&backend);
        let room = RoomId::new();
        let alice = UserId::new();
        backend.add_member(alice, room);
        let (a, _rx) = connect(&hub, alice).await;

        hub.send_message(a, alice, room, "x").await.unwrap();
        assert_eq!(hub.purge_idle_buckets().await, 0);
    }
}
