//! Per-connection client records.
//!
//! A [`ClientHandle`] is what the registry stores for one connection:
//! its id, its display name and the producer side of its outbound queue.
//! The consumer side ([`OutboundRx`]) belongs to the connection's writer
//! task, which also owns the socket.
//!
//! Removal from the registry is announced through an [`Eviction`] so the
//! connection's own tasks stop as soon as the registry lets go of it,
//! even if they are stuck on a stalled socket.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::error::RelayError;
use crate::messages::OutboundMessage;

/// Display name used when the connecting user did not provide one.
pub const ANONYMOUS: &str = "Anonymous";

/// Identifier for a connected client.
///
/// This is intentionally opaque; uniqueness is guaranteed per
/// [`Registry`](crate::Registry) for the lifetime of that registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type OutboundTx = mpsc::Sender<OutboundMessage>;
pub type OutboundRx = mpsc::Receiver<OutboundMessage>;

/// Registry-side record of one connected peer.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    display_name: Arc<str>,
    outbound: OutboundTx,
    evicted: Arc<watch::Sender<bool>>,
}

impl ClientHandle {
    /// Create a client record plus the receiving end of its outbound queue.
    ///
    /// `capacity` is clamped to at least 1. A blank or missing display
    /// name becomes [`ANONYMOUS`].
    pub fn new(id: ClientId, display_name: Option<&str>, capacity: usize) -> (Self, OutboundRx) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let display_name = match display_name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => ANONYMOUS,
        };

        let handle = ClientHandle {
            id,
            display_name: Arc::from(display_name),
            outbound: tx,
            evicted: Arc::new(watch::channel(false).0),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Watch for this client's removal from the registry.
    pub fn eviction(&self) -> Eviction {
        Eviction {
            rx: self.evicted.subscribe(),
        }
    }

    /// Mark the client as removed. Called by the registry on deregistration.
    pub(crate) fn evict(&self) {
        self.evicted.send_replace(true);
    }

    /// Non-blocking handoff into the outbound queue.
    ///
    /// Never waits: a full slot means the writer is not ready, and the
    /// caller is expected to treat the client as unresponsive.
    pub fn try_deliver(&self, msg: OutboundMessage) -> Result<(), RelayError> {
        match self.outbound.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::Backpressure(self.id)),
            Err(TrySendError::Closed(_)) => Err(RelayError::Disconnected(self.id)),
        }
    }
}

/// Resolves once the client has been deregistered.
#[derive(Debug, Clone)]
pub struct Eviction {
    rx: watch::Receiver<bool>,
}

impl Eviction {
    pub fn is_evicted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for deregistration. Also returns if every handle to the client
    /// has been dropped, since nobody can deliver to it any more.
    pub async fn evicted(&mut self) {
        let _ = self.rx.wait_for(|evicted| *evicted).await;
    }
}
