//! WebSocket chat and presence client for the POWER clinic platform.
//!
//! The backend multiplexes chat and presence over one WebSocket endpoint;
//! this crate drives it from the terminal side. Each concern owns its own
//! supervised connection:
//!
//! - [`connection`]: the supervisor (connect, heartbeat, capped reconnect)
//! - [`session`]: chat state (rooms, messages, typing, correlated requests)
//! - [`presence`]: who is online right now
//! - [`repl`]: the interactive front end wiring both together
//!
//! [`ChatSession`] and [`PresenceTracker`] are plain values; every piece of
//! state hangs off the instance, so two sessions in one process never share
//! anything, and dropping one tears its connection down.

pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod formatter;
pub mod presence;
pub mod repl;
pub mod session;

pub use config::ClientConfig;
pub use connection::{
    ConnectionEvent, ConnectionSettings, ConnectionState, ReconnectPolicy, WsConnection, WsHandle,
};
pub use error::ClientError;
pub use presence::PresenceTracker;
pub use session::{ChatSession, Operation, RequestSink, SessionEvent, SessionStatus};
