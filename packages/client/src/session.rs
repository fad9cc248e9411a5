//! Chat session manager: rooms, messages, typing indicators, and the
//! pending-request table for correlated server replies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use power_realtime_protocol::{
    ChatMessage, ChatRoom, ClientRequest, Envelope, RoomType, ServerEvent,
};

use crate::{
    config::ClientConfig,
    connection::{ConnectionEvent, ConnectionState, WsConnection, WsHandle},
    domain::{self, RoomState, TypingMap},
    error::ClientError,
};

#[cfg(test)]
use mockall::automock;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Outbound port of the session: everything it needs from the connection.
#[cfg_attr(test, automock)]
pub trait RequestSink: Send + Sync {
    /// Serialize and transmit one request; `false` when not connected.
    fn send(&self, envelope: Envelope<ClientRequest>) -> bool;
    fn is_connected(&self) -> bool;
}

impl RequestSink for WsHandle {
    fn send(&self, envelope: Envelope<ClientRequest>) -> bool {
        WsHandle::send(self, envelope)
    }

    fn is_connected(&self) -> bool {
        WsHandle::is_connected(self)
    }
}

/// Coarse connection status as the UI wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected,
    Disconnected,
    /// The reconnect budget is spent; a manual retry is required.
    Error,
}

impl SessionStatus {
    pub fn from_connection(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => SessionStatus::Connected,
            ConnectionState::Failed { .. } => SessionStatus::Error,
            _ => SessionStatus::Disconnected,
        }
    }
}

/// Broadcast notifications for UI consumers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageReceived { room_id: String, message: ChatMessage },
    HistoryLoaded { room_id: String, count: usize },
    RoomCreated { room_id: String },
    TypingChanged { room_id: String },
    StatusChanged(SessionStatus),
    ServerError { detail: String },
}

/// The in-flight operation, for busy indicators.
///
/// History loads carry the correlation id of the request they are waiting
/// on; only the matching reply (or a server error) clears them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Operation {
    #[default]
    Idle,
    LoadingHistory {
        room_id: String,
        correlation_id: String,
    },
    CreatingRoom {
        correlation_id: String,
    },
}

struct ErrorBanner {
    detail: String,
    expires_at: Instant,
}

#[derive(Default)]
struct SessionState {
    rooms: HashMap<String, RoomState>,
    typing: TypingMap,
    active_room: Option<String>,
    operation: Operation,
    banner: Option<ErrorBanner>,
}

struct SessionShared {
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<String, ClientError>>>>,
    events: broadcast::Sender<SessionEvent>,
    sink: Arc<dyn RequestSink>,
    config: ClientConfig,
}

/// One chat session over its own supervised connection.
///
/// All state lives on the instance; dropping the session tears down the
/// connection and fails anything still waiting on a server reply.
pub struct ChatSession {
    shared: Arc<SessionShared>,
    conn: Option<WsConnection>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ChatSession {
    /// Open the chat connection and start dispatching inbound events.
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
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState::default()),
            pending: Mutex::new(HashMap::new()),
            events,
            sink: Arc::new(conn.handle()),
            config,
        });

        tokio::spawn(dispatch_loop(shared.clone(), event_rx, conn.state()));

        Self {
            shared,
            conn: Some(conn),
            state_rx,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Send a chat message to a room.
    ///
    /// Returns `false` without emitting anything when the text trims to
    /// empty, the room id is empty, or the connection is down. There is no
    /// optimistic local append; the message shows up via `new_message`.
    pub fn send_chat_message(&self, room_id: &str, text: &str, recipient_id: Option<i64>) -> bool {
        let text = text.trim();
        if text.is_empty() || room_id.is_empty() {
            return false;
        }
        if !self.shared.sink.is_connected() {
            tracing::warn!("Cannot send message: not connected");
            return false;
        }
        self.shared.sink.send(Envelope::new(ClientRequest::SendMessage {
            room_id: room_id.to_string(),
            message: text.to_string(),
            recipient_id,
        }))
    }

    pub fn start_typing(&self, room_id: &str) -> bool {
        if room_id.is_empty() {
            return false;
        }
        self.shared.sink.send(Envelope::new(ClientRequest::TypingStart {
            room_id: room_id.to_string(),
        }))
    }

    pub fn stop_typing(&self, room_id: &str) -> bool {
        if room_id.is_empty() {
            return false;
        }
        self.shared.sink.send(Envelope::new(ClientRequest::TypingStop {
            room_id: room_id.to_string(),
        }))
    }

    /// Ask the server to mark a message read. The local flag flips when the
    /// `read_receipt` comes back, not before.
    pub fn mark_message_read(&self, message_id: &str) -> bool {
        self.shared.sink.send(Envelope::new(ClientRequest::MarkMessageRead {
            message_id: message_id.to_string(),
        }))
    }

    /// Request a room's history. The loading flag set here is cleared only
    /// by the reply carrying the same correlation id.
    pub async fn load_chat_history(&self, room_id: &str, limit: u32) -> bool {
        request_history(&self.shared, room_id, limit).await
    }

    /// Fire-and-forget room creation; the room materializes on
    /// `chat_room_created`.
    pub fn create_chat_room(
        &self,
        participant_ids: Vec<i64>,
        room_name: &str,
        room_type: RoomType,
    ) -> bool {
        self.shared.sink.send(Envelope::new(ClientRequest::CreateChatRoom {
            participant_ids,
            room_name: room_name.to_string(),
            room_type,
        }))
    }

    /// Open (or reuse) a direct-message room with one other user and wait
    /// for it to be ready.
    ///
    /// An already-known direct room is reused immediately: it becomes the
    /// active room, a history load is kicked off, and its id is returned
    /// without touching the server. Otherwise a correlated `create_chat_room`
    /// is sent and the call waits for the matching `chat_room_created` up to
    /// the configured timeout.
    pub async fn create_direct_message(
        &self,
        user_id: i64,
        user_name: &str,
    ) -> Result<String, ClientError> {
        let existing = {
            let state = self.shared.state.lock().await;
            domain::find_direct_room(&state.rooms, user_id)
        };
        if let Some(room_id) = existing {
            tracing::info!("Reusing direct room {} for user {}", room_id, user_id);
            self.set_active_room(Some(room_id.clone())).await;
            request_history(&self.shared, &room_id, self.shared.config.history_limit).await;
            return Ok(room_id);
        }

        let me = self.shared.config.user_id.ok_or(ClientError::NoCurrentUser)?;
        if !self.shared.sink.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let my_name = self
            .shared
            .config
            .user_name
            .clone()
            .unwrap_or_else(|| format!("user-{me}"));
        let (envelope, correlation_id) = Envelope::correlated(ClientRequest::CreateChatRoom {
            participant_ids: vec![me, user_id],
            room_name: format!("{my_name} / {user_name}"),
            room_type: RoomType::Direct,
        });

        let (resolve_tx, resolve_rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .await
            .insert(correlation_id.clone(), resolve_tx);
        {
            let mut state = self.shared.state.lock().await;
            state.operation = Operation::CreatingRoom {
                correlation_id: correlation_id.clone(),
            };
        }

        if !self.shared.sink.send(envelope) {
            self.abandon_pending(&correlation_id).await;
            return Err(ClientError::NotConnected);
        }

        match tokio::time::timeout(self.shared.config.room_creation_timeout, resolve_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => {
                tracing::warn!("Room creation timed out for user {}", user_id);
                self.abandon_pending(&correlation_id).await;
                Err(ClientError::Timeout)
            }
        }
    }

    async fn abandon_pending(&self, correlation_id: &str) {
        self.shared.pending.lock().await.remove(correlation_id);
        let mut state = self.shared.state.lock().await;
        let clears = matches!(
            &state.operation,
            Operation::CreatingRoom { correlation_id: id } if *id == correlation_id
        );
        if clears {
            state.operation = Operation::Idle;
        }
    }

    pub async fn rooms(&self) -> Vec<ChatRoom> {
        let state = self.shared.state.lock().await;
        state.rooms.values().filter_map(|r| r.info.clone()).collect()
    }

    pub async fn messages(&self, room_id: &str) -> Vec<ChatMessage> {
        let state = self.shared.state.lock().await;
        state
            .rooms
            .get(room_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    /// Users typing in the room right now. Entries older than the typing
    /// expiry are never returned, sweep or no sweep.
    pub async fn typing_users(&self, room_id: &str) -> Vec<String> {
        let mut state = self.shared.state.lock().await;
        let now = Instant::now();
        domain::purge_typing(&mut state.typing, now);
        domain::typing_user_names(&state.typing, room_id, now)
    }

    pub async fn active_room(&self) -> Option<String> {
        self.shared.state.lock().await.active_room.clone()
    }

    pub async fn set_active_room(&self, room_id: Option<String>) {
        self.shared.state.lock().await.active_room = room_id;
    }

    pub async fn unread_count(&self, room_id: &str) -> usize {
        let state = self.shared.state.lock().await;
        state
            .rooms
            .get(room_id)
            .map(|r| domain::unread_count(r, self.shared.config.user_id))
            .unwrap_or(0)
    }

    pub async fn operation(&self) -> Operation {
        self.shared.state.lock().await.operation.clone()
    }

    /// The current server error banner, if it has not expired yet.
    pub async fn last_error(&self) -> Option<String> {
        let mut state = self.shared.state.lock().await;
        expire_banner(&mut state, Instant::now());
        state.banner.as_ref().map(|b| b.detail.clone())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_connection(&self.state_rx.borrow())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to session notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Manual retry after the reconnect budget was spent.
    pub fn reconnect(&self) {
        if let Some(conn) = &self.conn {
            conn.request_reconnect();
        }
    }

    pub fn disconnect(&self) {
        if let Some(conn) = &self.conn {
            conn.disconnect();
        }
    }
}

fn expire_banner(state: &mut SessionState, now: Instant) {
    if state.banner.as_ref().is_some_and(|b| b.expires_at <= now) {
        state.banner = None;
    }
}

/// Register a loading operation and emit `get_chat_history`. The flag is
/// rolled back if the send is refused.
async fn request_history(shared: &SessionShared, room_id: &str, limit: u32) -> bool {
    if room_id.is_empty() || !shared.sink.is_connected() {
        return false;
    }
    let (envelope, correlation_id) = Envelope::correlated(ClientRequest::GetChatHistory {
        room_id: room_id.to_string(),
        limit,
    });
    {
        let mut state = shared.state.lock().await;
        state.operation = Operation::LoadingHistory {
            room_id: room_id.to_string(),
            correlation_id: correlation_id.clone(),
        };
    }
    if shared.sink.send(envelope) {
        return true;
    }
    let mut state = shared.state.lock().await;
    let clears = matches!(
        &state.operation,
        Operation::LoadingHistory { correlation_id: id, .. } if *id == correlation_id
    );
    if clears {
        state.operation = Operation::Idle;
    }
    false
}

async fn dispatch_loop(
    shared: Arc<SessionShared>,
    mut event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    mut state_rx: watch::Receiver<ConnectionState>,
) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut last_status = SessionStatus::from_connection(&state_rx.borrow());
    let mut state_alive = true;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(ConnectionEvent::Message(envelope)) => {
                    apply_server_event(&shared, envelope).await;
                }
                Some(ConnectionEvent::Opened) => {
                    tracing::info!("Chat connection open");
                }
                Some(ConnectionEvent::Closed { normal }) => {
                    tracing::info!("Chat connection closed (normal: {})", normal);
                }
                Some(ConnectionEvent::TransportError(detail)) => {
                    tracing::warn!("Chat transport error: {}", detail);
                }
                None => break,
            },
            changed = state_rx.changed(), if state_alive => match changed {
                Ok(()) => {
                    let status = SessionStatus::from_connection(&state_rx.borrow());
                    if status != last_status {
                        last_status = status;
                        let _ = shared.events.send(SessionEvent::StatusChanged(status));
                    }
                }
                Err(_) => state_alive = false,
            },
            _ = sweep.tick() => {
                let mut state = shared.state.lock().await;
                let now = Instant::now();
                domain::purge_typing(&mut state.typing, now);
                expire_banner(&mut state, now);
            },
        }
    }

    // The session is going away; answer anything still waiting.
    let mut pending = shared.pending.lock().await;
    for (_, resolver) in pending.drain() {
        let _ = resolver.send(Err(ClientError::SessionClosed));
    }
}

async fn apply_server_event(shared: &SessionShared, envelope: Envelope<ServerEvent>) {
    let correlation_id = envelope.correlation_id;
    match envelope.payload {
        ServerEvent::NewMessage { message } => {
            let room_id = message.room_id.clone();
            let (inserted, mark_read) = {
                let mut state = shared.state.lock().await;
                let room = state.rooms.entry(room_id.clone()).or_default();
                let inserted = domain::insert_message(&mut room.messages, message.clone());
                let mark_read = inserted
                    && state.active_room.as_deref() == Some(room_id.as_str())
                    && shared.config.user_id.is_some_and(|me| me != message.sender_id);
                (inserted, mark_read)
            };
            if inserted {
                if mark_read {
                    // The viewer is looking at this room; acknowledge now.
                    let _ = shared.sink.send(Envelope::new(ClientRequest::MarkMessageRead {
                        message_id: message.id.clone(),
                    }));
                }
                let _ = shared
                    .events
                    .send(SessionEvent::MessageReceived { room_id, message });
            } else {
                tracing::debug!("Duplicate message {} dropped", message.id);
            }
        }

        ServerEvent::TypingIndicator {
            user_id,
            user_name,
            room_id,
            is_typing,
        } => {
            {
                let mut state = shared.state.lock().await;
                let deadline = Instant::now() + shared.config.typing_expiry;
                domain::update_typing(&mut state.typing, &room_id, user_id, &user_name, is_typing, deadline);
            }
            let _ = shared.events.send(SessionEvent::TypingChanged { room_id });
        }

        ServerEvent::ReadReceipt { message_id, reader_id } => {
            let mut state = shared.state.lock().await;
            if !domain::apply_read_receipt(&mut state.rooms, &message_id) {
                tracing::debug!(
                    "Read receipt from {} for unknown message {}",
                    reader_id,
                    message_id
                );
            }
        }

        ServerEvent::ChatHistory { room_id, messages } => {
            let count = messages.len();
            {
                let mut state = shared.state.lock().await;
                let room = state.rooms.entry(room_id.clone()).or_default();
                domain::replace_history(room, messages);
                // Only the load this reply answers may clear the flag.
                let clears = matches!(
                    &state.operation,
                    Operation::LoadingHistory { correlation_id: id, .. }
                        if correlation_id.as_deref() == Some(id.as_str())
                );
                if clears {
                    state.operation = Operation::Idle;
                }
            }
            let _ = shared.events.send(SessionEvent::HistoryLoaded { room_id, count });
        }

        ServerEvent::ChatRoomCreated { room } => {
            let resolver = match &correlation_id {
                Some(id) => shared.pending.lock().await.remove(id),
                None => None,
            };
            let room_id = room.id.clone();
            {
                let mut state = shared.state.lock().await;
                domain::merge_room(&mut state.rooms, room);
                if resolver.is_some() {
                    // This is the answer to our own creation request.
                    state.active_room = Some(room_id.clone());
                    let clears = matches!(
                        &state.operation,
                        Operation::CreatingRoom { correlation_id: id }
                            if correlation_id.as_deref() == Some(id.as_str())
                    );
                    if clears {
                        state.operation = Operation::Idle;
                    }
                }
            }
            if let Some(resolver) = resolver {
                request_history(shared, &room_id, shared.config.history_limit).await;
                let _ = resolver.send(Ok(room_id.clone()));
            }
            let _ = shared.events.send(SessionEvent::RoomCreated { room_id });
        }

        ServerEvent::MessageSent { message } => {
            tracing::debug!("Message {} acknowledged", message.id);
        }

        ServerEvent::Error(detail) => {
            let text = detail.detail().to_string();
            tracing::warn!("Server error: {}", text);
            {
                let mut state = shared.state.lock().await;
                state.banner = Some(ErrorBanner {
                    detail: text.clone(),
                    expires_at: Instant::now() + shared.config.error_banner_ttl,
                });
                state.operation = Operation::Idle;
            }
            // Only the request named by the echoed correlation id is
            // rejected; an uncorrelated error fails nothing in flight.
            if let Some(id) = &correlation_id {
                if let Some(resolver) = shared.pending.lock().await.remove(id) {
                    let _ = resolver.send(Err(ClientError::Server(text.clone())));
                }
            }
            let _ = shared.events.send(SessionEvent::ServerError { detail: text });
        }

        ServerEvent::UserStatusUpdate { .. }
        | ServerEvent::OnlineUsersList { .. }
        | ServerEvent::HeartbeatResponse => {
            // Presence traffic belongs to the presence connection.
            tracing::trace!("Ignoring presence event on the chat connection");
        }
    }
}
