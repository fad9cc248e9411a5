//! Supervised WebSocket connection with bounded reconnection.
//!
//! One `WsConnection` owns one socket and the task that babysits it: it
//! connects, pumps frames, emits heartbeats, and on abnormal closure retries
//! at a fixed interval until the attempt ceiling is hit. Consumers observe
//! the connection through a `watch` channel of [`ConnectionState`] and an
//! mpsc stream of [`ConnectionEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tokio_util::sync::CancellationToken;

use power_realtime_protocol::{ClientRequest, Envelope, ServerEvent};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state as published through the watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The reconnect budget is spent; only [`WsConnection::request_reconnect`]
    /// leaves this state.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Reconnection budget: a fixed number of attempts at a fixed interval.
///
/// There is deliberately no backoff growth and no jitter; the backend expects
/// clients to give up quickly and hand control back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Knobs of one supervised connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub policy: ReconnectPolicy,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Everything the supervisor reports to its owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Socket is open; the attempt counter has been reset.
    Opened,
    /// One parsed inbound envelope. Frames that fail to parse are logged and
    /// dropped before this point.
    Message(Envelope<ServerEvent>),
    /// The socket closed. `normal` is true only for a peer close frame with
    /// code 1000 or a client-initiated disconnect; nothing is retried after a
    /// normal close.
    Closed { normal: bool },
    /// A connect attempt or an established socket failed. Reported for
    /// observability; the retry scheduling happens regardless.
    TransportError(String),
}

enum Command {
    Send(Envelope<ClientRequest>),
    Disconnect,
    Reconnect,
}

/// Cheap cloneable sender half of a connection.
#[derive(Clone)]
pub struct WsHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl WsHandle {
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Serialize and transmit one request. Fire-and-forget: returns `false`
    /// without queuing anything when the connection is not open.
    pub fn send(&self, envelope: Envelope<ClientRequest>) -> bool {
        if !self.is_connected() {
            tracing::warn!("Dropping outbound request: not connected");
            return false;
        }
        self.cmd_tx.send(Command::Send(envelope)).is_ok()
    }
}

/// A supervised WebSocket connection.
///
/// Dropping the value cancels the supervisor task; in-flight requests are
/// discarded, never replayed.
pub struct WsConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl WsConnection {
    /// Start the supervisor task.
    ///
    /// `url_builder` is invoked before every connect attempt, so a caller
    /// that rotates its bearer token can hand over a closure that re-reads
    /// it each time.
    pub fn spawn(
        url_builder: impl Fn() -> String + Send + Sync + 'static,
        settings: ConnectionSettings,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        tokio::spawn(supervise(
            Arc::new(url_builder),
            settings,
            cmd_rx,
            state_tx,
            event_tx,
            shutdown.clone(),
        ));

        Self {
            cmd_tx,
            state_rx,
            shutdown,
        }
    }

    /// Handle for sending requests without holding the connection itself.
    pub fn handle(&self) -> WsHandle {
        WsHandle {
            cmd_tx: self.cmd_tx.clone(),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Close with code 1000 and stop the supervisor permanently.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// From [`ConnectionState::Failed`], reset the attempt counter and start
    /// connecting again. A no-op in any other state.
    pub fn request_reconnect(&self) {
        let _ = self.cmd_tx.send(Command::Reconnect);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum SocketEnd {
    PeerClosedNormal,
    PeerClosedAbnormal,
    LocalClose,
    Shutdown,
}

enum WaitResult {
    Proceed,
    Stop,
    Shutdown,
}

async fn supervise(
    url_builder: Arc<dyn Fn() -> String + Send + Sync>,
    settings: ConnectionSettings,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
) {
    let mut attempt: u32 = 0;

    'connect: loop {
        if attempt == 0 {
            state_tx.send_replace(ConnectionState::Connecting);
        }

        let url = url_builder();
        // The query string carries the bearer token; keep it out of the logs.
        let display_url = url.split('?').next().unwrap_or("").to_string();
        tracing::info!("Connecting to {}", display_url);

        let connect_fut = connect_async(url.as_str());
        tokio::pin!(connect_fut);
        let connected = loop {
            tokio::select! {
                result = &mut connect_fut => break result,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Disconnect) => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        break 'connect;
                    }
                    Some(Command::Reconnect) => {}
                    Some(Command::Send(_)) => {
                        tracing::debug!("Dropping request while connecting");
                    }
                    None => break 'connect,
                },
                _ = shutdown.cancelled() => break 'connect,
            }
        };

        match connected {
            Ok((stream, _response)) => {
                attempt = 0;
                state_tx.send_replace(ConnectionState::Connected);
                let _ = event_tx.send(ConnectionEvent::Opened);
                tracing::info!("Connected to {}", display_url);

                let end = drive_socket(
                    stream,
                    &mut cmd_rx,
                    &event_tx,
                    settings.heartbeat_interval,
                    &shutdown,
                )
                .await;

                // Requests buffered during teardown are dropped, never replayed.
                let mut manual_close = matches!(end, SocketEnd::LocalClose);
                while let Ok(cmd) = cmd_rx.try_recv() {
                    match cmd {
                        Command::Send(_) => {
                            tracing::debug!("Dropping buffered request after close");
                        }
                        Command::Disconnect => manual_close = true,
                        Command::Reconnect => {}
                    }
                }

                match end {
                    SocketEnd::Shutdown => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        break 'connect;
                    }
                    SocketEnd::PeerClosedNormal | SocketEnd::LocalClose => {
                        state_tx.send_replace(ConnectionState::Disconnected);
                        let _ = event_tx.send(ConnectionEvent::Closed { normal: true });
                        break 'connect;
                    }
                    SocketEnd::PeerClosedAbnormal => {
                        let _ = event_tx.send(ConnectionEvent::Closed { normal: false });
                        if manual_close {
                            state_tx.send_replace(ConnectionState::Disconnected);
                            break 'connect;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Connection attempt to {} failed: {}", display_url, e);
                let _ = event_tx.send(ConnectionEvent::TransportError(e.to_string()));
            }
        }

        attempt += 1;
        if attempt > settings.policy.max_attempts {
            tracing::error!(
                "Giving up after {} reconnect attempts",
                settings.policy.max_attempts
            );
            state_tx.send_replace(ConnectionState::Failed {
                reason: format!(
                    "gave up after {} reconnect attempts",
                    settings.policy.max_attempts
                ),
            });
            match park_until_retry(&mut cmd_rx, &shutdown).await {
                WaitResult::Proceed => {
                    attempt = 0;
                    continue 'connect;
                }
                WaitResult::Stop => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    break 'connect;
                }
                WaitResult::Shutdown => break 'connect,
            }
        } else {
            state_tx.send_replace(ConnectionState::Reconnecting { attempt });
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                settings.policy.interval,
                attempt,
                settings.policy.max_attempts
            );
            match wait_retry_interval(settings.policy.interval, &mut cmd_rx, &shutdown).await {
                WaitResult::Proceed => {}
                WaitResult::Stop => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    break 'connect;
                }
                WaitResult::Shutdown => break 'connect,
            }
        }
    }
}

/// Pump one open socket until it ends, interleaving reads with outbound
/// commands and the heartbeat timer.
async fn drive_socket(
    stream: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    heartbeat_interval: Duration,
    shutdown: &CancellationToken,
) -> SocketEnd {
    let (mut write, mut read) = stream.split();

    // The first heartbeat fires one full interval after open, not immediately.
    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Envelope<ServerEvent>>(&text) {
                        Ok(envelope) => {
                            let _ = event_tx.send(ConnectionEvent::Message(envelope));
                        }
                        Err(e) => {
                            tracing::warn!("Dropping unparseable frame: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let normal = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                    tracing::info!("Server closed the connection (normal: {})", normal);
                    return if normal {
                        SocketEnd::PeerClosedNormal
                    } else {
                        SocketEnd::PeerClosedAbnormal
                    };
                }
                Some(Ok(Message::Ping(_))) => {
                    // Pong replies are handled by tungstenite itself.
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    let _ = event_tx.send(ConnectionEvent::TransportError(e.to_string()));
                    return SocketEnd::PeerClosedAbnormal;
                }
                None => {
                    tracing::info!("WebSocket stream ended without a close frame");
                    return SocketEnd::PeerClosedAbnormal;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(envelope)) => {
                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                tracing::warn!("Failed to send request: {}", e);
                                let _ = event_tx.send(ConnectionEvent::TransportError(e.to_string()));
                                return SocketEnd::PeerClosedAbnormal;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize request: {}", e);
                        }
                    }
                }
                Some(Command::Disconnect) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Close frame not delivered: {}", e);
                    }
                    return SocketEnd::LocalClose;
                }
                Some(Command::Reconnect) => {
                    tracing::debug!("Ignoring reconnect request while connected");
                }
                None => return SocketEnd::Shutdown,
            },
            _ = heartbeat.tick() => {
                let envelope = Envelope::new(ClientRequest::Heartbeat {
                    timestamp: Utc::now(),
                });
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            tracing::warn!("Heartbeat send failed: {}", e);
                            let _ = event_tx.send(ConnectionEvent::TransportError(e.to_string()));
                            return SocketEnd::PeerClosedAbnormal;
                        }
                        tracing::trace!("Heartbeat sent");
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize heartbeat: {}", e);
                    }
                }
            },
            _ = shutdown.cancelled() => return SocketEnd::Shutdown,
        }
    }
}

/// Parked in `Failed`: wait for a manual reconnect request or a stop.
async fn park_until_retry(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &CancellationToken,
) -> WaitResult {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Reconnect) => return WaitResult::Proceed,
                Some(Command::Disconnect) => return WaitResult::Stop,
                Some(Command::Send(_)) => {
                    tracing::warn!("Dropping request: connection has failed");
                }
                None => return WaitResult::Shutdown,
            },
            _ = shutdown.cancelled() => return WaitResult::Shutdown,
        }
    }
}

/// Sit out the retry interval, still honoring disconnects. A reconnect
/// request skips the remainder of the wait.
async fn wait_retry_interval(
    interval: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    shutdown: &CancellationToken,
) -> WaitResult {
    let deadline = Instant::now() + interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return WaitResult::Proceed,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Disconnect) => return WaitResult::Stop,
                Some(Command::Reconnect) => return WaitResult::Proceed,
                Some(Command::Send(_)) => {
                    tracing::debug!("Dropping request while reconnecting");
                }
                None => return WaitResult::Shutdown,
            },
            _ = shutdown.cancelled() => return WaitResult::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_helpers() {
        // テスト項目: 接続状態の判定ヘルパーが各バリアントを正しく分類する
        // given (前提条件):
        let connected = ConnectionState::Connected;
        let reconnecting = ConnectionState::Reconnecting { attempt: 2 };
        let failed = ConnectionState::Failed {
            reason: "gave up".to_string(),
        };

        // when (操作):
        let connected_is = (connected.is_connected(), connected.is_connecting());
        let reconnecting_is = (reconnecting.is_connected(), reconnecting.is_connecting());
        let failed_is = (failed.is_connected(), failed.is_connecting());

        // then (期待する結果):
        assert_eq!(connected_is, (true, false));
        assert_eq!(reconnecting_is, (false, true));
        assert_eq!(failed_is, (false, false));
    }

    #[test]
    fn test_reconnect_policy_defaults() {
        // テスト項目: 再接続ポリシーの既定値が 5 回 / 3 秒固定である
        // given (前提条件):

        // when (操作):
        let policy = ReconnectPolicy::default();

        // then (期待する結果):
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::from_secs(3));
    }

    #[test]
    fn test_connection_settings_defaults() {
        // テスト項目: 接続設定の既定値がハートビート 30 秒である
        // given (前提条件):

        // when (操作):
        let settings = ConnectionSettings::default();

        // then (期待する結果):
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.policy, ReconnectPolicy::default());
    }

    #[test]
    fn test_handle_refuses_to_send_while_disconnected() {
        // テスト項目: 未接続のハンドルが送信を拒否しキューに何も積まない
        // given (前提条件):
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = WsHandle { cmd_tx, state_rx };

        // when (操作):
        let sent = handle.send(Envelope::new(ClientRequest::GetOnlineUsers));

        // then (期待する結果):
        assert!(!sent);
        assert!(cmd_rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_sends_while_connected() {
        // テスト項目: 接続中のハンドルがリクエストをキューに積む
        // given (前提条件):
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let handle = WsHandle { cmd_tx, state_rx };

        // when (操作):
        let sent = handle.send(Envelope::new(ClientRequest::TypingStart {
            room_id: "r1".to_string(),
        }));

        // then (期待する結果):
        assert!(sent);
        let queued = cmd_rx.try_recv();
        assert!(matches!(
            queued,
            Ok(Command::Send(envelope))
                if matches!(&envelope.payload, ClientRequest::TypingStart { room_id } if room_id == "r1")
        ));
    }
}
