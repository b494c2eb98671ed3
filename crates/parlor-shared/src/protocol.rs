//! WebSocket wire protocol.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Event names are snake_case, payload fields camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParlorError;
use crate::types::{Message, RoomId, UserId};

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
    Typing(TypingUpdate),
    SendMessage(OutgoingMessage),
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ParlorError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::SendMessage(_) => "send_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room_id: RoomId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub room_id: RoomId,
    #[serde(default)]
    pub content: String,
}

/// Events the relay sends to one or more clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserStatus(UserStatus),
    JoinedRoom(RoomRef),
    LeftRoom(RoomRef),
    Typing(TypingNotice),
    ReceiveMessage(ReceivedMessage),
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn online(user_id: UserId) -> Self {
        ServerEvent::UserStatus(UserStatus {
            user_id,
            status: Presence::Online,
            last_seen_at: None,
        })
    }

    pub fn offline(user_id: UserId, last_seen_at: DateTime<Utc>) -> Self {
        ServerEvent::UserStatus(UserStatus {
            user_id,
            status: Presence::Offline,
            last_seen_at: Some(last_seen_at),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, ParlorError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: UserId,
    pub status: Presence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}
