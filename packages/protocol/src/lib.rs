//! Wire protocol for the POWER real-time layer.
//!
//! The clinic backend exposes a single WebSocket endpoint
//! (`/ws/presence/`) that multiplexes chat and presence traffic. Every frame
//! is one JSON object discriminated by a `type` field. This crate defines the
//! closed unions for both directions plus the data model they carry, so the
//! client and its test harness agree on the exact shapes.

pub mod envelope;
pub mod model;

pub use envelope::{ClientRequest, Envelope, ErrorDetail, ServerEvent};
pub use model::{ChatMessage, ChatRoom, OnlineUser, RoomType};
