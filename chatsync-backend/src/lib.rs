//! In-memory reference backend for ChatSync.
//!
//! Exposes the server for embedding in tests. It authenticates users by
//! token, records messages and read/delivery horizons, pushes events over
//! WebSocket and queues sync actions for users who are offline.

pub mod config;
pub mod server;
pub mod store;
