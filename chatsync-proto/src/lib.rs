//! Shared protocol definitions for the `ChatSync` wire format.

pub mod codec;
pub mod event;
pub mod message;
pub mod request;
