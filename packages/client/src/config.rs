//! Client configuration.

use std::time::Duration;

use crate::connection::{ConnectionSettings, DEFAULT_HEARTBEAT_INTERVAL, ReconnectPolicy};

/// Everything a session needs to reach and talk to the backend.
///
/// Every timer is overridable; the defaults match what the backend expects
/// from production clients. Tests compress them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8000/ws/presence/`. The one
    /// endpoint serves both chat and presence traffic.
    pub url: String,
    /// Bearer token appended to the URL as a `token` query parameter on
    /// every (re)connect. The upgrade request carries no auth header.
    pub token: Option<String>,
    /// Authenticated user id. Required for direct-message creation and for
    /// read-receipt bookkeeping.
    pub user_id: Option<i64>,
    /// Display name used when naming direct-message rooms.
    pub user_name: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    /// A typing indicator stays visible this long after its last refresh.
    pub typing_expiry: Duration,
    /// How long a direct-message creation waits for `chat_room_created`.
    pub room_creation_timeout: Duration,
    /// How long a server error banner stays readable.
    pub error_banner_ttl: Duration,
    /// Message count requested per history load.
    pub history_limit: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/presence/".to_string(),
            token: None,
            user_id: None,
            user_name: None,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            typing_expiry: Duration::from_secs(3),
            room_creation_timeout: Duration::from_secs(10),
            error_banner_ttl: Duration::from_secs(10),
            history_limit: 50,
        }
    }
}

impl ClientConfig {
    /// The endpoint with the token appended, percent-encoded.
    pub fn endpoint_url(&self) -> String {
        match &self.token {
            Some(token) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", self.url, separator, urlencoding::encode(token))
            }
            None => self.url.clone(),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            policy: self.reconnect.clone(),
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}
