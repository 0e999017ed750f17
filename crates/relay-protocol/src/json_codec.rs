//! JSON encoding/decoding for relay messages.
//!
//! This module converts between:
//! - WebSocket text (or binary) frame payloads
//! - `relay_core::ChatMessage` / `OutboundMessage`
//!
//! One frame carries exactly one JSON object.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use relay_core::{ChatMessage, OutboundMessage, PresenceSnapshot};

use crate::wire_types::{ChatFrame, InboundFrame, PresenceFrame, PRESENCE_TYPE};

/// Errors that can arise when encoding/decoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not valid JSON, or not the expected shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame that is not UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

// ============================================================================
// INPUT: client → server
// ============================================================================

/// Decode one inbound chat frame.
///
/// Only the shape is checked: empty content is a valid (if dull) message.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Same as [`decode_inbound`], for frames that arrived as binary.
pub fn decode_inbound_bytes(bytes: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_inbound(text)
}

// ============================================================================
// OUTPUT: server → client
// ============================================================================

/// Encode one outbound message as a JSON text frame.
pub fn encode_output(msg: &OutboundMessage) -> Result<String, ProtocolError> {
    let text = match msg {
        OutboundMessage::Chat(chat) => serde_json::to_string(&ChatFrame::from(chat.as_ref()))?,
        OutboundMessage::Presence(snapshot) => {
            serde_json::to_string(&PresenceFrame::from(snapshot.as_ref()))?
        }
    };
    Ok(text)
}

/// Decode an outbound frame (what a client receives).
///
/// Frames with `"type": "activeUsers"` are presence; anything else must be
/// a chat frame.
pub fn decode_output(text: &str) -> Result<OutboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("type").and_then(Value::as_str) == Some(PRESENCE_TYPE) {
        let frame: PresenceFrame = serde_json::from_value(value)?;
        return Ok(OutboundMessage::Presence(Arc::new(PresenceSnapshot::new(frame.users))));
    }

    let frame: ChatFrame = serde_json::from_value(value)?;
    Ok(OutboundMessage::Chat(Arc::new(ChatMessage::from(frame))))
}

/// Encode stored history as a JSON array of chat frames, oldest first.
pub fn encode_history(messages: &[ChatMessage]) -> Result<String, ProtocolError> {
    let frames: Vec<ChatFrame> = messages.iter().map(ChatFrame::from).collect();
    Ok(serde_json::to_string(&frames)?)
}
