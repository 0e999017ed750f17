//! Registry of connected clients.
//!
//! The registry is the single source of truth for "who is online".
//! All reads and writes go through one exclusive lock which is only held
//! while the map is mutated or copied, never across a send or any I/O.
//!
//! Every successful membership change raises the presence signal while the
//! lock is still held, so each change is followed by at least one roster
//! recomputation in the [`presence`](crate::presence) loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::{ClientHandle, ClientId};
use crate::messages::OutboundMessage;
use crate::presence::PresenceSignal;

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Clients that accepted the message.
    pub delivered: usize,

    /// Clients that could not accept it and were deregistered.
    pub dropped: Vec<ClientId>,
}

#[derive(Debug)]
pub struct Registry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
    presence: PresenceSignal,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            presence: PresenceSignal::default(),
        }
    }

    /// Allocate a fresh `ClientId`, unique for this registry.
    pub fn next_client_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Signal raised on every membership change.
    pub fn presence(&self) -> &PresenceSignal {
        &self.presence
    }

    /// Add a client. Returns `false` (and changes nothing) if a client
    /// with the same id is already registered.
    pub async fn register(&self, client: ClientHandle) -> bool {
        let mut guard = self.clients.lock().await;
        let id = client.id();

        if guard.contains_key(&id) {
            warn!(client_id = %id, "client registered twice; ignoring");
            return false;
        }

        debug!(
            client_id = %id,
            display_name = client.display_name(),
            total = guard.len() + 1,
            "client registered"
        );
        guard.insert(id, client);
        self.presence.notify_changed();
        true
    }

    /// Remove a client and fire its [`Eviction`](crate::client::Eviction).
    /// Idempotent: removing an absent client is a no-op and raises no
    /// presence signal. Returns whether anything was removed.
    pub async fn deregister(&self, id: ClientId) -> bool {
        let mut guard = self.clients.lock().await;

        match guard.remove(&id) {
            Some(client) => {
                client.evict();
                debug!(
                    client_id = %id,
                    display_name = client.display_name(),
                    total = guard.len(),
                    "client deregistered"
                );
                self.presence.notify_changed();
                true
            }
            None => false,
        }
    }

    /// Display names of every registered client, as of one instant.
    pub async fn snapshot(&self) -> Vec<String> {
        let guard = self.clients.lock().await;
        guard
            .values()
            .map(|c| c.display_name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }

    /// Copy of the current membership, to minimize lock hold time.
    async fn recipients(&self) -> Vec<ClientHandle> {
        let guard = self.clients.lock().await;
        guard.values().cloned().collect()
    }

    /// Hand `msg` to every registered client without waiting on any of them.
    ///
    /// Clients that cannot take the message right now are deregistered;
    /// the message is not retried or buffered for them.
    pub async fn fan_out(&self, msg: OutboundMessage) -> FanOut {
        let mut outcome = FanOut::default();

        for client in self.recipients().await {
            match client.try_deliver(msg.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(err) => {
                    warn!(
                        client_id = %client.id(),
                        display_name = client.display_name(),
                        kind = msg.kind(),
                        error = %err,
                        "dropping unresponsive client"
                    );
                    outcome.dropped.push(client.id());
                }
            }
        }

        for id in &outcome.dropped {
            self.deregister(*id).await;
        }

        outcome
    }
}
