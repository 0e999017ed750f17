//! Central broadcast loop.
//!
//! Every chat message from every reader task goes through one
//! [`Dispatcher`] channel and is processed by a single loop, so all
//! clients see chat traffic in the same (submission) order.
//!
//! For each message the loop:
//! - forwards it to the persistence loop (never waits on the store),
//! - fans it out to every client registered at that moment.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::error::RelayError;
use crate::messages::{ChatMessage, OutboundMessage};
use crate::registry::Registry;
use crate::store::MessageStore;

pub type DispatchRx = mpsc::UnboundedReceiver<ChatMessage>;
pub type PersistTx = mpsc::UnboundedSender<ChatMessage>;
pub type PersistRx = mpsc::UnboundedReceiver<ChatMessage>;

/// Submission handle, cloned into every reader task.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<ChatMessage>,
}

impl Dispatcher {
    pub fn channel() -> (Dispatcher, DispatchRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Dispatcher { tx }, rx)
    }

    /// Enqueue a message for persistence and fan-out. Does not wait for
    /// delivery to anyone.
    pub fn submit(&self, msg: ChatMessage) -> Result<(), RelayError> {
        self.tx.send(msg).map_err(|_| RelayError::DispatcherClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Run the dispatch loop.
///
/// - `dispatch_rx`: chat messages from all reader tasks.
/// - `registry`: current recipients.
/// - `persist_tx`: feed for [`run_persistence_loop`].
/// - `shutdown`: once it fires (or its sender is dropped) no new messages
///   are accepted; what was already submitted is still fanned out and
///   forwarded, then the loop ends and the persistence loop drains.
pub async fn run_dispatch_loop(
    mut dispatch_rx: DispatchRx,
    registry: Arc<Registry>,
    persist_tx: PersistTx,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut closing = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut shutdown, if !closing => {
                closing = true;
                dispatch_rx.close();
                continue;
            }
            next = dispatch_rx.recv() => next,
        };
        let Some(msg) = next else { break };

        if persist_tx.send(msg.clone()).is_err() {
            error!("Persistence loop is gone; message will not be stored");
        }

        let outcome = registry.fan_out(OutboundMessage::from(msg)).await;
        debug!(
            delivered = outcome.delivered,
            dropped = outcome.dropped.len(),
            "chat message fanned out"
        );
    }

    info!("Dispatch loop shutting down (dispatch channel closed)");
}

/// Save messages one at a time, in submission order. Failures are logged
/// and skipped; they never reach the dispatch loop.
pub async fn run_persistence_loop(mut persist_rx: PersistRx, store: Arc<dyn MessageStore>) {
    while let Some(msg) = persist_rx.recv().await {
        if let Err(err) = store.save_message(&msg).await {
            error!(sender = %msg.sender, error = %err, "Failed to save message");
        }
    }

    info!("Persistence loop shutting down");
}
