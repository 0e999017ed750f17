//! relay-core
//!
//! Transport-agnostic chat relay logic:
//! - messages (chat, presence, outbound queue items)
//! - per-connection client records
//! - client registry
//! - broadcast dispatcher and persistence loop
//! - presence notifier
//! - `Relay`, which wires the above together

pub mod messages;
pub mod client;
pub mod registry;
pub mod dispatcher;
pub mod presence;
pub mod store;
pub mod relay;
pub mod error;

pub use messages::{ChatMessage, OutboundMessage, PresenceSnapshot};

pub use client::{ClientHandle, ClientId, Eviction, OutboundRx, OutboundTx, ANONYMOUS};
pub use registry::{FanOut, Registry};
pub use dispatcher::Dispatcher;
pub use presence::PresenceSignal;
pub use store::{InMemoryStore, MessageStore, StoreError};
pub use relay::{Relay, RelayOptions};
pub use error::RelayError;
