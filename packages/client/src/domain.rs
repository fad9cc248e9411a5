//! Pure state transitions for chat and presence data.
//!
//! Everything here is side-effect free and operates on plain collections, so
//! the ordering, dedup, and expiry rules are testable without a socket.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use power_realtime_protocol::{ChatMessage, ChatRoom, OnlineUser};

/// In-memory state of one chat room.
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    /// Room metadata. `None` for placeholder rooms that have only been seen
    /// through their messages so far.
    pub info: Option<ChatRoom>,
    /// Messages ordered by timestamp, non-decreasing.
    pub messages: Vec<ChatMessage>,
}

/// One live typing indicator.
#[derive(Debug, Clone)]
pub struct TypingEntry {
    pub user_name: String,
    /// The entry counts as active strictly before this instant.
    pub deadline: Instant,
}

/// room id -> user id -> typing entry
pub type TypingMap = HashMap<String, HashMap<i64, TypingEntry>>;

/// Insert a message keeping the list sorted by timestamp.
///
/// Equal timestamps keep arrival order (the new message goes after).
///
/// # Arguments
///
/// * `messages` - The room's message list, ordered by timestamp
/// * `message` - The message to insert
///
/// # Returns
///
/// `true` if the message was inserted, `false` if its id was already present
pub fn insert_message(messages: &mut Vec<ChatMessage>, message: ChatMessage) -> bool {
    if messages.iter().any(|m| m.id == message.id) {
        return false;
    }
    let at = messages.partition_point(|m| m.timestamp <= message.timestamp);
    messages.insert(at, message);
    true
}

/// Replace a room's messages with a server-provided history snapshot.
///
/// The server is expected to send them ordered already; sorting here keeps
/// the non-decreasing invariant even when it does not.
///
/// # Arguments
///
/// * `room` - The room state whose messages are replaced
/// * `messages` - The snapshot to install
pub fn replace_history(room: &mut RoomState, mut messages: Vec<ChatMessage>) {
    messages.sort_by_key(|m| m.timestamp);
    room.messages = messages;
}

/// Flip the read flag of a message wherever it lives.
///
/// # Arguments
///
/// * `rooms` - All known rooms, searched in arbitrary order
/// * `message_id` - The id of the message to mark read
///
/// # Returns
///
/// `true` if a message with that id was found, `false` otherwise
pub fn apply_read_receipt(rooms: &mut HashMap<String, RoomState>, message_id: &str) -> bool {
    for room in rooms.values_mut() {
        if let Some(message) = room.messages.iter_mut().find(|m| m.id == message_id) {
            message.is_read = true;
            return true;
        }
    }
    false
}

/// Record room metadata, keeping any messages already collected under the id.
///
/// # Arguments
///
/// * `rooms` - All known rooms
/// * `room` - The metadata to merge in
pub fn merge_room(rooms: &mut HashMap<String, RoomState>, room: ChatRoom) {
    let id = room.id.clone();
    rooms.entry(id).or_default().info = Some(room);
}

/// Find an existing direct room that includes the given user.
///
/// # Arguments
///
/// * `rooms` - All known rooms
/// * `user_id` - The other participant to look for
///
/// # Returns
///
/// The id of the first matching direct room, or `None`
pub fn find_direct_room(rooms: &HashMap<String, RoomState>, user_id: i64) -> Option<String> {
    rooms.values().find_map(|state| {
        state
            .info
            .as_ref()
            .filter(|info| info.is_direct() && info.has_participant(user_id))
            .map(|info| info.id.clone())
    })
}

/// Count the messages not yet read and not authored by the viewer.
///
/// # Arguments
///
/// * `room` - The room to count in
/// * `viewer_id` - The current user's id, if known
///
/// # Returns
///
/// The number of unread messages from other senders
pub fn unread_count(room: &RoomState, viewer_id: Option<i64>) -> usize {
    room.messages
        .iter()
        .filter(|m| !m.is_read && Some(m.sender_id) != viewer_id)
        .count()
}

/// Refresh or remove one typing indicator.
///
/// # Arguments
///
/// * `typing` - The typing map to update
/// * `room_id` - The room the indicator belongs to
/// * `user_id` - The typing user
/// * `user_name` - The name to display for that user
/// * `is_typing` - `true` refreshes the entry, `false` removes it
/// * `deadline` - The instant the refreshed entry expires
pub fn update_typing(
    typing: &mut TypingMap,
    room_id: &str,
    user_id: i64,
    user_name: &str,
    is_typing: bool,
    deadline: Instant,
) {
    if is_typing {
        typing.entry(room_id.to_string()).or_default().insert(
            user_id,
            TypingEntry {
                user_name: user_name.to_string(),
                deadline,
            },
        );
    } else if let Some(room) = typing.get_mut(room_id) {
        room.remove(&user_id);
        if room.is_empty() {
            typing.remove(room_id);
        }
    }
}

/// Drop every typing entry whose deadline has passed.
///
/// # Arguments
///
/// * `typing` - The typing map to purge
/// * `now` - The instant to compare deadlines against
pub fn purge_typing(typing: &mut TypingMap, now: Instant) {
    for room in typing.values_mut() {
        room.retain(|_, entry| entry.deadline > now);
    }
    typing.retain(|_, room| !room.is_empty());
}

/// List the users currently typing in a room, sorted for stable display.
///
/// Expired entries are filtered even if no purge has run yet.
///
/// # Arguments
///
/// * `typing` - The typing map to read
/// * `room_id` - The room to list
/// * `now` - The instant to compare deadlines against
///
/// # Returns
///
/// The display names of users still typing, sorted alphabetically
pub fn typing_user_names(typing: &TypingMap, room_id: &str, now: Instant) -> Vec<String> {
    let mut names: Vec<String> = typing
        .get(room_id)
        .map(|room| {
            room.values()
                .filter(|entry| entry.deadline > now)
                .map(|entry| entry.user_name.clone())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Patch one user's online flag.
///
/// Users never seen in a roster get a minimal placeholder record. A missing
/// `last_seen` keeps the previous value.
///
/// # Arguments
///
/// * `users` - The presence map to update
/// * `user_id` - The user the update names
/// * `is_online` - The new online flag
/// * `last_seen` - The last-seen timestamp, when the server sent one
pub fn apply_status_update(
    users: &mut HashMap<i64, OnlineUser>,
    user_id: i64,
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
) {
    match users.get_mut(&user_id) {
        Some(user) => {
            user.is_online = is_online;
            if last_seen.is_some() {
                user.last_seen = last_seen;
            }
        }
        None => {
            users.insert(user_id, OnlineUser::from_status(user_id, is_online, last_seen));
        }
    }
}

/// Replace the whole roster with the server's list.
///
/// Entries absent from the new list are gone, not merged.
///
/// # Arguments
///
/// * `users` - The presence map to replace
/// * `list` - The server's roster
pub fn replace_online_users(users: &mut HashMap<i64, OnlineUser>, list: Vec<OnlineUser>) {
    users.clear();
    users.extend(list.into_iter().map(|user| (user.id, user)));
}

/// Collect the currently-online users for display.
///
/// # Arguments
///
/// * `users` - The presence map to read
///
/// # Returns
///
/// The online users only, sorted by username for stable display
pub fn sorted_online(users: &HashMap<i64, OnlineUser>) -> Vec<OnlineUser> {
    let mut online: Vec<OnlineUser> = users.values().filter(|u| u.is_online).cloned().collect();
    online.sort_by(|a, b| a.username.cmp(&b.username));
    online
}
