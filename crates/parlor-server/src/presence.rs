//! Live presence bookkeeping.
//!
//! Tracks which sessions each user has open and which users are live in
//! each room. Both views are derived from the set of registered sessions:
//! a user is live in a room exactly while at least one of their sessions
//! has joined it, and online exactly while at least one session exists.
//!
//! The registry does no locking of its own; [`RelayHub`] owns it behind a
//! single mutex.
//!
//! [`RelayHub`]: crate::hub::RelayHub

use std::collections::{HashMap, HashSet};

use parlor_shared::{RoomId, SessionId, UserId};

/// Result of removing a session.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Departure {
    /// The user has no live sessions left.
    pub was_last_session: bool,
    /// Rooms in which this was the user's last live session.
    pub vacated_rooms: HashSet<RoomId>,
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// user -> live sessions
    user_sessions: HashMap<UserId, HashSet<SessionId>>,
    /// session -> rooms it has joined
    session_rooms: HashMap<SessionId, HashSet<RoomId>>,
    /// room -> live user -> that user's sessions joined to the room
    room_members: HashMap<RoomId, HashMap<UserId, HashSet<SessionId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `true` when this is the user's first live
    /// session, i.e. the user just came online.
    pub fn register_connection(&mut self, user_id: UserId, session_id: SessionId) -> bool {
        let sessions = self.user_sessions.entry(user_id).or_default();
        let came_online = sessions.is_empty();
        sessions.insert(session_id);
        self.session_rooms.entry(session_id).or_default();
        came_online
    }

    /// Remove a session and every room join it held.
    pub fn remove_connection(&mut self, user_id: UserId, session_id: SessionId) -> Departure {
        let mut departure = Departure::default();

        let rooms = self.session_rooms.remove(&session_id).unwrap_or_default();
        for room_id in rooms {
            if self.detach(session_id, user_id, room_id) {
                departure.vacated_rooms.insert(room_id);
            }
        }

        if let Some(sessions) = self.user_sessions.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.user_sessions.remove(&user_id);
            }
        }
        departure.was_last_session = !self.user_sessions.contains_key(&user_id);

        departure
    }

    /// Record that `session_id` joined `room_id`. Returns `false` when the
    /// session is not registered (it already disconnected).
    pub fn join_room(&mut self, session_id: SessionId, user_id: UserId, room_id: RoomId) -> bool {
        let Some(rooms) = self.session_rooms.get_mut(&session_id) else {
            return false;
        };
        rooms.insert(room_id);
        self.room_members
            .entry(room_id)
            .or_default()
            .entry(user_id)
            .or_default()
            .insert(session_id);
        true
    }

    /// Undo a join. Returns `true` when the user is no longer live in the
    /// room as a result.
    pub fn leave_room(&mut self, session_id: SessionId, user_id: UserId, room_id: RoomId) -> bool {
        let was_joined = self
            .session_rooms
            .get_mut(&session_id)
            .is_some_and(|rooms| rooms.remove(&room_id));
        if !was_joined {
            return false;
        }
        self.detach(session_id, user_id, room_id)
    }

    fn detach(&mut self, session_id: SessionId, user_id: UserId, room_id: RoomId) -> bool {
        let Some(members) = self.room_members.get_mut(&room_id) else {
            return false;
        };

        let mut vacated = false;
        if let Some(sessions) = members.get_mut(&user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                members.remove(&user_id);
                vacated = true;
            }
        }

        if members.is_empty() {
            self.room_members.remove(&room_id);
        }
        vacated
    }

    /// Users with at least one session joined to the room.
    pub fn live_members_of(&self, room_id: RoomId) -> HashSet<UserId> {
        self.room_members
            .get(&room_id)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every session joined to the room.
    pub fn sessions_in(&self, room_id: RoomId) -> Vec<SessionId> {
        self.room_members
            .get(&room_id)
            .map(|members| members.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.user_sessions.contains_key(&user_id)
    }

    pub fn online_users(&self) -> usize {
        self.user_sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.session_rooms.len()
    }
}
