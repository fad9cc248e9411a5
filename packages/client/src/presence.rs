//! Presence tracker: who is online right now, over its own connection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};

use power_realtime_protocol::{ClientRequest, Envelope, OnlineUser, ServerEvent};

use crate::{
    config::ClientConfig,
    connection::{ConnectionEvent, ConnectionState, WsConnection},
    domain,
    session::{RequestSink, SessionStatus},
};

/// Live view of user presence, fed by `user_status_update` pushes and
/// `online_users_list` rosters.
///
/// The tracker holds its own supervised connection, separate from the chat
/// session's, so a stalled chat socket does not freeze the roster.
pub struct PresenceTracker {
    users: Arc<Mutex<HashMap<i64, OnlineUser>>>,
    sink: Arc<dyn RequestSink>,
    conn: WsConnection,
    state_rx: watch::Receiver<ConnectionState>,
}

impl PresenceTracker {
    /// Open the presence connection and start folding events into the map.
    /// Every time the socket (re)opens, the full roster is re-requested.
    pub fn connect(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = WsConnection::spawn(
            {
                let config = config.clone();
                move || config.endpoint_url()
            },
            config.connection_settings(),
            event_tx,
        );
        let state_rx = conn.state();
        let users: Arc<Mutex<HashMap<i64, OnlineUser>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink: Arc<dyn RequestSink> = Arc::new(conn.handle());

        tokio::spawn(track_loop(users.clone(), sink.clone(), event_rx));

        Self {
            users,
            sink,
            conn,
            state_rx,
        }
    }

    /// Whether a user is currently online. Unknown users are offline.
    pub async fn is_online(&self, user_id: i64) -> bool {
        self.users
            .lock()
            .await
            .get(&user_id)
            .is_some_and(|user| user.is_online)
    }

    pub async fn last_seen(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.users.lock().await.get(&user_id).and_then(|user| user.last_seen)
    }

    /// The currently-online users, sorted by username.
    pub async fn online_users(&self) -> Vec<OnlineUser> {
        domain::sorted_online(&*self.users.lock().await)
    }

    pub async fn online_count(&self) -> usize {
        self.users
            .lock()
            .await
            .values()
            .filter(|user| user.is_online)
            .count()
    }

    /// Ask the server for a fresh roster.
    pub fn refresh(&self) -> bool {
        self.sink.send(Envelope::new(ClientRequest::GetOnlineUsers))
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_connection(&self.state_rx.borrow())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn reconnect(&self) {
        self.conn.request_reconnect();
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
    }
}

async fn track_loop(
    users: Arc<Mutex<HashMap<i64, OnlineUser>>>,
    sink: Arc<dyn RequestSink>,
    mut event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ConnectionEvent::Opened => {
                // Fresh socket, fresh roster.
                if !sink.send(Envelope::new(ClientRequest::GetOnlineUsers)) {
                    tracing::warn!("Online users request dropped before the socket settled");
                }
            }
            ConnectionEvent::Message(envelope) => {
                let mut users = users.lock().await;
                apply_presence_event(&mut users, envelope.payload);
            }
            ConnectionEvent::Closed { normal } => {
                tracing::info!("Presence connection closed (normal: {})", normal);
            }
            ConnectionEvent::TransportError(detail) => {
                tracing::warn!("Presence transport error: {}", detail);
            }
        }
    }
}

/// Fold one server event into the user map. Chat traffic is ignored here;
/// this connection only consumes presence events.
fn apply_presence_event(users: &mut HashMap<i64, OnlineUser>, event: ServerEvent) {
    match event {
        ServerEvent::UserStatusUpdate {
            user_id,
            is_online,
            last_seen,
        } => {
            domain::apply_status_update(users, user_id, is_online, last_seen);
        }
        ServerEvent::OnlineUsersList { users: roster } => {
            tracing::debug!("Roster replaced: {} users", roster.len());
            domain::replace_online_users(users, roster);
        }
        ServerEvent::HeartbeatResponse => {}
        other => {
            tracing::trace!("Ignoring chat event on the presence connection: {:?}", other);
        }
    }
}
