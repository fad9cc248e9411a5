//! Data model carried by the chat/presence envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat room.
///
/// `Direct` rooms are 1:1 conversations and are the only kind the
/// direct-message reuse search considers. Labels this client does not
/// recognize fold into `Other` so the room still materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Direct,
    Group,
    #[serde(other)]
    Other,
}

/// One chat message as the backend broadcasts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

/// A chat room as materialized by a `chat_room_created` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub room_type: RoomType,
    #[serde(default)]
    pub participants: Vec<i64>,
}

impl ChatRoom {
    pub fn is_direct(&self) -> bool {
        self.room_type == RoomType::Direct
    }

    pub fn has_participant(&self, user_id: i64) -> bool {
        self.participants.contains(&user_id)
    }
}

/// One entry of the `online_users_list` payload.
///
/// The backend annotates each entry with the full user record; only the
/// fields the client actually reads are modeled here, the rest are ignored
/// on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl OnlineUser {
    /// Minimal record for a user first seen through a `user_status_update`,
    /// before any list refresh supplied the full payload.
    pub fn from_status(id: i64, is_online: bool, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            username: format!("user-{id}"),
            full_name: None,
            is_online,
            last_seen,
        }
    }

    /// Name to show in a roster: the full name when the backend sent one,
    /// otherwise the username.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}
