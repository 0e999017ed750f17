//! relay-protocol
//!
//! Wire-level encoding/decoding for the chat relay.
//!
//! This crate is responsible for turning logical relay messages
//! (`relay_core::ChatMessage` / `OutboundMessage`) into JSON text frames
//! and back again.
//!
//! - [`wire_types`] : serde shapes of every frame
//! - [`json_codec`] : decode inbound frames, encode outbound frames

pub mod wire_types;
pub mod json_codec;

pub use json_codec::{
    ProtocolError,
    decode_inbound,
    decode_inbound_bytes,
    decode_output,
    encode_history,
    encode_output,
};

pub use wire_types::{ChatFrame, InboundFrame, PresenceFrame};
