//! Serde shapes of the JSON frames.
//!
//! Client → server:
//!
//! ```text
//! {"sender": "alice", "content": "hi", "timestamp": "2024-05-01T12:00:00Z"}
//! ```
//!
//! `sender` and `timestamp` may be omitted; the server replaces both anyway.
//!
//! Server → client, chat (legacy shape, no `type` field):
//!
//! ```text
//! {"sender": "alice", "content": "hi", "timestamp": "2024-05-01T12:00:00.123Z"}
//! ```
//!
//! Server → client, presence:
//!
//! ```text
//! {"type": "activeUsers", "users": ["alice", "bob"]}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::{ChatMessage, PresenceSnapshot};

/// Value of the `type` field on presence frames.
pub const PRESENCE_TYPE: &str = PresenceSnapshot::KIND;

/// A chat frame as typed by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InboundFrame {
    /// Client's claim about who it is. Informational only.
    #[serde(default)]
    pub sender: Option<String>,

    pub content: String,

    /// Client's clock. Informational only.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundFrame {
    /// Build the server-side message: sender is the authenticated display
    /// name and the timestamp is the receipt time, whatever the client said.
    pub fn into_chat(self, sender: &str, received_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage::new(sender, self.content, received_at)
    }
}

/// Outbound chat frame, also used for stored history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatFrame {
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ChatMessage> for ChatFrame {
    fn from(msg: &ChatMessage) -> Self {
        ChatFrame {
            sender: msg.sender.clone(),
            content: msg.content.clone(),
            timestamp: msg.timestamp,
        }
    }
}

impl From<ChatFrame> for ChatMessage {
    fn from(frame: ChatFrame) -> Self {
        ChatMessage::new(frame.sender, frame.content, frame.timestamp)
    }
}

/// Outbound presence frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PresenceFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub users: Vec<String>,
}

impl From<&PresenceSnapshot> for PresenceFrame {
    fn from(snapshot: &PresenceSnapshot) -> Self {
        PresenceFrame {
            kind: PRESENCE_TYPE.to_string(),
            users: snapshot.users.clone(),
        }
    }
}
