//! Error types for the chat/presence client.

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Most failures in this client are state, not errors: a dropped connection
/// shows up as a status change and a refused send returns `false`. Only the
/// awaitable operations reject with one of these.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Operation requires an open connection
    #[error("not connected to the chat server")]
    NotConnected,

    /// Operation requires an authenticated user on the session
    #[error("no current user configured for this session")]
    NoCurrentUser,

    /// The server did not answer within the allowed window
    #[error("timed out waiting for a server reply")]
    Timeout,

    /// The server answered with an error envelope
    #[error("server error: {0}")]
    Server(String),

    /// The session shut down while a reply was pending
    #[error("session closed before the server replied")]
    SessionClosed,
}
