//! Message formatting utilities for client display.

use power_realtime_protocol::{ChatMessage, ChatRoom, OnlineUser, RoomType};
use power_realtime_shared::time::{format_clock, format_timestamp};

use crate::connection::ConnectionState;

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format one incoming chat message as a banner block
    ///
    /// # Arguments
    ///
    /// * `message` - The message to render
    /// * `viewer_id` - The current user's ID (to mark own messages as "me")
    ///
    /// # Returns
    ///
    /// A formatted string with the message block
    pub fn format_chat_message(message: &ChatMessage, viewer_id: Option<i64>) -> String {
        let me_suffix = if viewer_id == Some(message.sender_id) {
            " (me)"
        } else {
            ""
        };
        format!(
            "\n\n------------------------------------------------------------\n\
             @{}{}: {}\n\
             sent at {}\n\
             ------------------------------------------------------------\n",
            message.sender_name,
            me_suffix,
            message.message,
            format_timestamp(&message.timestamp)
        )
    }

    /// Format a room's message history, one line per message
    ///
    /// # Arguments
    ///
    /// * `room_id` - The room the history belongs to
    /// * `messages` - Messages in display order (oldest first)
    /// * `viewer_id` - The current user's ID (to mark own messages as "me")
    ///
    /// # Returns
    ///
    /// A formatted string with the history block
    pub fn format_history(
        room_id: &str,
        messages: &[ChatMessage],
        viewer_id: Option<i64>,
    ) -> String {
        let mut output = String::new();
        output.push_str("\n\n============================================================\n");
        output.push_str(&format!("History for {}:\n", room_id));

        if messages.is_empty() {
            output.push_str("(No messages)\n");
        } else {
            for message in messages {
                let me_suffix = if viewer_id == Some(message.sender_id) {
                    " (me)"
                } else {
                    ""
                };
                output.push_str(&format!(
                    "[{}] {}{}: {}\n",
                    format_clock(&message.timestamp),
                    message.sender_name,
                    me_suffix,
                    message.message
                ));
            }
        }

        output.push_str("============================================================\n");
        output
    }

    /// Format one line of the room list
    ///
    /// # Arguments
    ///
    /// * `room` - The room to render
    /// * `active_room` - The currently active room id, if any (marked with "*")
    /// * `unread` - The number of unread messages in the room
    ///
    /// # Returns
    ///
    /// A formatted single-line string
    pub fn format_room_line(room: &ChatRoom, active_room: Option<&str>, unread: usize) -> String {
        let marker = if active_room == Some(room.id.as_str()) {
            "*"
        } else {
            " "
        };
        let kind = match room.room_type {
            RoomType::Direct => "direct",
            RoomType::Group => "group",
            RoomType::Other => "other",
        };
        let name = if room.name.is_empty() {
            room.id.as_str()
        } else {
            room.name.as_str()
        };
        let unread_suffix = if unread > 0 {
            format!(" ({} unread)", unread)
        } else {
            String::new()
        };
        format!("{} {} [{}]{}", marker, name, kind, unread_suffix)
    }

    /// Format one line of the presence roster
    pub fn format_presence_line(user: &OnlineUser) -> String {
        if user.is_online {
            format!("+ {} (online)", user.display_name())
        } else {
            match &user.last_seen {
                Some(ts) => format!("- {} (last seen {})", user.display_name(), format_timestamp(ts)),
                None => format!("- {} (offline)", user.display_name()),
            }
        }
    }

    /// Format a typing notice; empty when nobody is typing
    pub fn format_typing(room_id: &str, names: &[String]) -> String {
        if names.is_empty() {
            return String::new();
        }
        format!("\n{} typing in {}...\n", names.join(", "), room_id)
    }

    /// Format a connection state for the /status display
    ///
    /// # Arguments
    ///
    /// * `label` - Which connection this line describes (e.g. "chat")
    /// * `state` - The current connection state
    ///
    /// # Returns
    ///
    /// A formatted single-line string
    pub fn format_connection_state(label: &str, state: &ConnectionState) -> String {
        match state {
            ConnectionState::Disconnected => format!("{}: disconnected", label),
            ConnectionState::Connecting => format!("{}: connecting...", label),
            ConnectionState::Connected => format!("{}: connected", label),
            ConnectionState::Reconnecting { attempt } => {
                format!("{}: reconnecting (attempt {})", label, attempt)
            }
            ConnectionState::Failed { reason } => {
                format!("{}: failed ({}), use /retry to try again", label, reason)
            }
        }
    }

    /// Format a server error banner
    pub fn format_error_banner(detail: &str) -> String {
        format!("\n! server error: {}\n", detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_message(sender_id: i64) -> ChatMessage {
        ChatMessage {
            id: "m1".to_string(),
            room_id: "r1".to_string(),
            sender_id,
            sender_name: "alice".to_string(),
            message: "Hello, world!".to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 1, 1, 9, 30, 15).unwrap(),
            is_read: false,
        }
    }

    #[test]
    fn test_format_chat_message_marks_own_messages() {
        // テスト項目: 自分のメッセージに (me) マークが付く
        // given (前提条件):
        let message = sample_message(7);

        // when (操作):
        let result = MessageFormatter::format_chat_message(&message, Some(7));

        // then (期待する結果):
        assert!(result.contains("@alice (me): Hello, world!"));
        assert!(result.contains("sent at 2023-01-01T09:30:15Z"));
        assert!(result.contains("------------------------------------------------------------"));
    }

    #[test]
    fn test_format_chat_message_without_viewer_has_no_me_mark() {
        // テスト項目: 他人のメッセージには (me) マークが付かない
        // given (前提条件):
        let message = sample_message(42);

        // when (操作):
        let result = MessageFormatter::format_chat_message(&message, Some(7));

        // then (期待する結果):
        assert!(result.contains("@alice: Hello, world!"));
        assert!(!result.contains("(me)"));
    }

    #[test]
    fn test_format_history_with_empty_messages() {
        // テスト項目: 履歴が空の場合、適切なメッセージが表示される
        // given (前提条件):
        let messages = vec![];

        // when (操作):
        let result = MessageFormatter::format_history("r1", &messages, Some(7));

        // then (期待する結果):
        assert!(result.contains("History for r1:"));
        assert!(result.contains("(No messages)"));
        assert!(result.contains("============================================================"));
    }

    #[test]
    fn test_format_history_lists_messages_with_clock_times() {
        // テスト項目: 履歴の各行に時刻と送信者が表示される
        // given (前提条件):
        let messages = vec![sample_message(7), sample_message(42)];

        // when (操作):
        let result = MessageFormatter::format_history("r1", &messages, Some(7));

        // then (期待する結果):
        assert!(result.contains("[09:30:15] alice (me): Hello, world!"));
        assert!(result.contains("[09:30:15] alice: Hello, world!"));
    }

    #[test]
    fn test_format_room_line_marks_active_room_and_unread() {
        // テスト項目: アクティブルームに * が付き未読数が表示される
        // given (前提条件):
        let room = ChatRoom {
            id: "r1".to_string(),
            name: "Front desk".to_string(),
            room_type: RoomType::Group,
            participants: vec![7, 42],
        };

        // when (操作):
        let active = MessageFormatter::format_room_line(&room, Some("r1"), 3);
        let inactive = MessageFormatter::format_room_line(&room, Some("r2"), 0);

        // then (期待する結果):
        assert_eq!(active, "* Front desk [group] (3 unread)");
        assert_eq!(inactive, "  Front desk [group]");
    }

    #[test]
    fn test_format_room_line_falls_back_to_room_id() {
        // テスト項目: 名前の無いルームは id で表示される
        // given (前提条件):
        let room = ChatRoom {
            id: "r9".to_string(),
            name: String::new(),
            room_type: RoomType::Direct,
            participants: vec![],
        };

        // when (操作):
        let result = MessageFormatter::format_room_line(&room, None, 0);

        // then (期待する結果):
        assert_eq!(result, "  r9 [direct]");
    }

    #[test]
    fn test_format_presence_line_shows_last_seen_when_offline() {
        // テスト項目: オフラインユーザーに最終接続時刻が表示される
        // given (前提条件):
        let user = OnlineUser {
            id: 42,
            username: "bob".to_string(),
            full_name: Some("Bob Tanaka".to_string()),
            is_online: false,
            last_seen: Some(Utc.with_ymd_and_hms(2023, 1, 1, 9, 30, 15).unwrap()),
        };

        // when (操作):
        let result = MessageFormatter::format_presence_line(&user);

        // then (期待する結果):
        assert_eq!(result, "- Bob Tanaka (last seen 2023-01-01T09:30:15Z)");
    }

    #[test]
    fn test_format_presence_line_shows_online_users_with_plus() {
        // テスト項目: オンラインユーザーが + 付きで表示される
        // given (前提条件):
        let user = OnlineUser {
            id: 42,
            username: "bob".to_string(),
            full_name: None,
            is_online: true,
            last_seen: None,
        };

        // when (操作):
        let result = MessageFormatter::format_presence_line(&user);

        // then (期待する結果):
        assert_eq!(result, "+ bob (online)");
    }

    #[test]
    fn test_format_typing_is_empty_when_nobody_types() {
        // テスト項目: タイピング中のユーザーがいない場合は空文字列になる
        // given (前提条件):
        let names: Vec<String> = vec![];

        // when (操作):
        let result = MessageFormatter::format_typing("r1", &names);

        // then (期待する結果):
        assert!(result.is_empty());
    }

    #[test]
    fn test_format_typing_joins_names() {
        // テスト項目: 複数のタイピング中ユーザーがカンマ区切りで表示される
        // given (前提条件):
        let names = vec!["alice".to_string(), "bob".to_string()];

        // when (操作):
        let result = MessageFormatter::format_typing("r1", &names);

        // then (期待する結果):
        assert!(result.contains("alice, bob typing in r1..."));
    }

    #[test]
    fn test_format_connection_state_covers_reconnecting_and_failed() {
        // テスト項目: 再接続中と失敗状態が区別して表示される
        // given (前提条件):
        let reconnecting = ConnectionState::Reconnecting { attempt: 2 };
        let failed = ConnectionState::Failed {
            reason: "gave up after 5 reconnect attempts".to_string(),
        };

        // when (操作):
        let reconnecting_line = MessageFormatter::format_connection_state("chat", &reconnecting);
        let failed_line = MessageFormatter::format_connection_state("chat", &failed);

        // then (期待する結果):
        assert_eq!(reconnecting_line, "chat: reconnecting (attempt 2)");
        assert!(failed_line.contains("failed (gave up after 5 reconnect attempts)"));
        assert!(failed_line.contains("/retry"));
    }

    #[test]
    fn test_format_error_banner_includes_detail() {
        // テスト項目: サーバーエラーのバナーに詳細が含まれる
        // given (前提条件):
        let detail = "room not found";

        // when (操作):
        let result = MessageFormatter::format_error_banner(detail);

        // then (期待する結果):
        assert!(result.contains("server error: room not found"));
    }
}
