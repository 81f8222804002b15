//! Realtime conversation with the remote interviewer agent
//!
//! The controller only sees the four-event contract of [`ConversationClient`]:
//! connected, disconnected, message and error. [`WebSocketConversationClient`]
//! is the production transport.

mod client;
pub mod protocol;
mod websocket;

pub use client::{
    ConversationClient, ConversationError, ConversationEvents, DynamicVariables,
    SessionOpenPayload, TransportKind,
};
pub use websocket::WebSocketConversationClient;
