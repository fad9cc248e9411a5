//! Shared utilities for the POWER real-time workspace.
//!
//! Small pieces needed by both the client library and its binaries:
//! logging bootstrap and time helpers.

pub mod logger;
pub mod time;
