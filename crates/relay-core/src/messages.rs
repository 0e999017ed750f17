//! Message types used by the relay core.
//!
//! These are **transport-agnostic** logical messages:
//! - [`ChatMessage`]: one line of chat, produced by a reader task.
//! - [`PresenceSnapshot`]: the roster of connected display names.
//! - [`OutboundMessage`]: what gets handed to a client's outbound queue.
//!
//! Note: JSON encoders live in the `relay-protocol` crate;
//! this module is purely logical.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A chat message as seen by the dispatcher and the message store.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Display name of the author.
    pub sender: String,

    /// Message body, passed through verbatim.
    pub content: String,

    /// When the server received the message.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        ChatMessage {
            sender: sender.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// Stamp a message with the current time.
    pub fn received_now(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, Utc::now())
    }
}

/// Current roster of connected users.
///
/// Always recomputed from the registry as a whole; never patched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceSnapshot {
    /// Display names, sorted. Duplicates are kept: two connections
    /// with the same name show up twice.
    pub users: Vec<String>,
}

impl PresenceSnapshot {
    /// Wire tag for presence frames.
    pub const KIND: &'static str = "activeUsers";

    pub fn new(mut users: Vec<String>) -> Self {
        users.sort();
        PresenceSnapshot { users }
    }
}

/// An item in a client's outbound queue.
///
/// Payloads are shared so that fan-out is a refcount bump per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Chat(Arc<ChatMessage>),
    Presence(Arc<PresenceSnapshot>),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Chat(_) => "chat",
            OutboundMessage::Presence(_) => PresenceSnapshot::KIND,
        }
    }
}

impl From<ChatMessage> for OutboundMessage {
    fn from(msg: ChatMessage) -> Self {
        OutboundMessage::Chat(Arc::new(msg))
    }
}

impl From<PresenceSnapshot> for OutboundMessage {
    fn from(snapshot: PresenceSnapshot) -> Self {
        OutboundMessage::Presence(Arc::new(snapshot))
    }
}
