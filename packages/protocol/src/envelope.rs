//! Wire envelopes: the tagged request/event unions and the correlation wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ChatMessage, ChatRoom, OnlineUser, RoomType};

/// Wrapper adding an optional correlation id to any tagged payload.
///
/// Requests that expect a directed reply are sent with a fresh correlation
/// id; the backend echoes it on the corresponding reply, which is how the
/// client tells "the answer to my request" apart from an unrelated broadcast
/// of the same event type. Fire-and-forget requests and broadcasts omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(flatten)]
    pub payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> Envelope<T> {
    /// Envelope without a correlation id, for fire-and-forget traffic.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            correlation_id: None,
        }
    }

    /// Envelope with a fresh correlation id; returns the id so the caller
    /// can register it before the reply races back.
    pub fn correlated(payload: T) -> (Self, String) {
        let id = Uuid::new_v4().to_string();
        (
            Self {
                payload,
                correlation_id: Some(id.clone()),
            },
            id,
        )
    }
}

/// Everything the client can send, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    SendMessage {
        room_id: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<i64>,
    },
    TypingStart {
        room_id: String,
    },
    TypingStop {
        room_id: String,
    },
    MarkMessageRead {
        message_id: String,
    },
    GetChatHistory {
        room_id: String,
        limit: u32,
    },
    CreateChatRoom {
        participant_ids: Vec<i64>,
        room_name: String,
        room_type: RoomType,
    },
    GetOnlineUsers,
}

/// Error payload the backend attaches to `type: "error"` events.
///
/// Backends are inconsistent about which field carries the text, so both
/// are kept and `detail` picks whichever is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorDetail {
    pub fn detail(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("unknown server error")
    }
}

/// Everything the backend can push, tagged by `type`.
///
/// The union is closed: an unknown `type` fails deserialization instead of
/// being carried around as an untyped blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        message: ChatMessage,
    },
    TypingIndicator {
        user_id: i64,
        user_name: String,
        room_id: String,
        is_typing: bool,
    },
    ReadReceipt {
        message_id: String,
        reader_id: i64,
    },
    ChatHistory {
        room_id: String,
        messages: Vec<ChatMessage>,
    },
    ChatRoomCreated {
        room: ChatRoom,
    },
    MessageSent {
        message: ChatMessage,
    },
    Error(ErrorDetail),
    UserStatusUpdate {
        user_id: i64,
        is_online: bool,
        #[serde(default)]
        last_seen: Option<DateTime<Utc>>,
    },
    OnlineUsersList {
        users: Vec<OnlineUser>,
    },
    HeartbeatResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_request_serializes_with_snake_case_tag() {
        // テスト項目: リクエストが type タグ付き snake_case JSON になる
        // given (前提条件):
        let request = Envelope::new(ClientRequest::TypingStart {
            room_id: "r1".to_string(),
        });

        // when (操作):
        let json = serde_json::to_value(&request).unwrap();

        // then (期待する結果):
        assert_eq!(json["type"], "typing_start");
        assert_eq!(json["room_id"], "r1");
        assert!(json.get("correlation_id").is_none());
    }

    #[test]
    fn test_correlated_envelope_carries_its_id() {
        // テスト項目: correlated が correlation_id を払い出して JSON に載せる
        // given (前提条件):
        let (request, id) = Envelope::correlated(ClientRequest::CreateChatRoom {
            participant_ids: vec![1, 2],
            room_name: "DM".to_string(),
            room_type: RoomType::Direct,
        });

        // when (操作):
        let json = serde_json::to_value(&request).unwrap();

        // then (期待する結果):
        assert_eq!(json["type"], "create_chat_room");
        assert_eq!(json["correlation_id"], id.as_str());
        assert_eq!(json["participant_ids"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_unit_request_serializes_as_bare_tag() {
        // テスト項目: フィールド無しリクエストが type のみの JSON になる
        // given (前提条件):
        let request = Envelope::new(ClientRequest::GetOnlineUsers);

        // when (操作):
        let json = serde_json::to_value(&request).unwrap();

        // then (期待する結果):
        assert_eq!(json, serde_json::json!({ "type": "get_online_users" }));
    }

    #[test]
    fn test_send_message_omits_missing_recipient() {
        // テスト項目: recipient_id が None のとき JSON から省かれる
        // given (前提条件):
        let request = Envelope::new(ClientRequest::SendMessage {
            room_id: "r1".to_string(),
            message: "hello".to_string(),
            recipient_id: None,
        });

        // when (操作):
        let json = serde_json::to_value(&request).unwrap();

        // then (期待する結果):
        assert!(json.get("recipient_id").is_none());
    }

    #[test]
    fn test_new_message_event_parses() {
        // テスト項目: new_message イベントがパースでき is_read が既定値になる
        // given (前提条件):
        let raw = r#"{
            "type": "new_message",
            "message": {
                "id": "m1",
                "room_id": "r1",
                "sender_id": 7,
                "sender_name": "Jane",
                "message": "hi",
                "timestamp": "2023-01-01T09:30:15Z"
            }
        }"#;

        // when (操作):
        let event: Envelope<ServerEvent> = serde_json::from_str(raw).unwrap();

        // then (期待する結果):
        match event.payload {
            ServerEvent::NewMessage { message } => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.sender_id, 7);
                assert!(!message.is_read);
                let expected = Utc.with_ymd_and_hms(2023, 1, 1, 9, 30, 15).unwrap();
                assert_eq!(message.timestamp, expected);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(event.correlation_id.is_none());
    }

    #[test]
    fn test_chat_room_created_keeps_echoed_correlation_id() {
        // テスト項目: chat_room_created のエコーされた correlation_id が取れる
        // given (前提条件):
        let raw = r#"{
            "type": "chat_room_created",
            "room": { "id": "r9", "room_type": "direct", "participants": [1, 2] },
            "correlation_id": "abc-123"
        }"#;

        // when (操作):
        let event: Envelope<ServerEvent> = serde_json::from_str(raw).unwrap();

        // then (期待する結果):
        assert_eq!(event.correlation_id.as_deref(), Some("abc-123"));
        match event.payload {
            ServerEvent::ChatRoomCreated { room } => {
                assert_eq!(room.id, "r9");
                assert!(room.is_direct());
                assert_eq!(room.name, "");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_error_detail_prefers_error_field() {
        // テスト項目: ErrorDetail::detail が error を優先し message に落ちる
        // given (前提条件):
        let both = ErrorDetail {
            error: Some("room not found".to_string()),
            message: Some("ignored".to_string()),
        };
        let only_message = ErrorDetail {
            error: None,
            message: Some("fallback".to_string()),
        };
        let neither = ErrorDetail {
            error: None,
            message: None,
        };

        // when (操作):
        let first = both.detail();
        let second = only_message.detail();
        let third = neither.detail();

        // then (期待する結果):
        assert_eq!(first, "room not found");
        assert_eq!(second, "fallback");
        assert_eq!(third, "unknown server error");
    }

    #[test]
    fn test_error_event_parses_with_correlation_id() {
        // テスト項目: error イベントが correlation_id 付きでパースできる
        // given (前提条件):
        let raw = r#"{
            "type": "error",
            "error": "room not found",
            "correlation_id": "abc-123"
        }"#;

        // when (操作):
        let event: Envelope<ServerEvent> = serde_json::from_str(raw).unwrap();

        // then (期待する結果):
        assert_eq!(event.correlation_id.as_deref(), Some("abc-123"));
        match event.payload {
            ServerEvent::Error(detail) => assert_eq!(detail.detail(), "room not found"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        // テスト項目: 未知の type がデシリアライズエラーになる
        // given (前提条件):
        let raw = r#"{ "type": "totally_new_event", "data": 1 }"#;

        // when (操作):
        let result: Result<Envelope<ServerEvent>, _> = serde_json::from_str(raw);

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_heartbeat_response_tolerates_extra_fields() {
        // テスト項目: heartbeat_response が余分なフィールドを無視してパースできる
        // given (前提条件):
        let raw = r#"{ "type": "heartbeat_response", "timestamp": "2023-01-01T09:30:15Z" }"#;

        // when (操作):
        let event: Envelope<ServerEvent> = serde_json::from_str(raw).unwrap();

        // then (期待する結果):
        assert_eq!(event.payload, ServerEvent::HeartbeatResponse);
    }

    #[test]
    fn test_online_users_list_parses() {
        // テスト項目: online_users_list の各エントリがパースできる
        // given (前提条件):
        let raw = r#"{
            "type": "online_users_list",
            "users": [
                { "id": 1, "username": "jdoe", "full_name": "Jane Doe", "is_online": true },
                { "id": 2, "username": "asmith", "is_online": false, "last_seen": "2023-01-01T09:30:15Z" }
            ]
        }"#;

        // when (操作):
        let event: Envelope<ServerEvent> = serde_json::from_str(raw).unwrap();

        // then (期待する結果):
        match event.payload {
            ServerEvent::OnlineUsersList { users } => {
                assert_eq!(users.len(), 2);
                assert_eq!(users[0].display_name(), "Jane Doe");
                assert!(!users[1].is_online);
                assert!(users[1].last_seen.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
