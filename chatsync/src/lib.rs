//! `ChatSync`: real-time message synchronization core for one-to-one chat.
//!
//! A persistent WebSocket transport with request correlation and REST
//! fallback, a conversation store with horizon-derived delivery and read
//! state, an idempotent event router, and a sync engine that catches up on
//! actions missed while offline.

pub mod chat;
pub mod config;
pub mod transport;
