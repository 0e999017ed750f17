//! Presence notifier.
//!
//! Membership changes raise a level-triggered [`PresenceSignal`]. A single
//! loop waits on it, recomputes the roster from the registry and fans the
//! snapshot out with the same drop-on-backpressure policy as chat traffic.
//!
//! A burst of changes may collapse into one recomputation, but a change
//! that lands while a recomputation is running always causes another one.
//! Clients dropped during a presence fan-out raise the signal again; since
//! that only ever shrinks the live set, the cascade terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::messages::{OutboundMessage, PresenceSnapshot};
use crate::registry::Registry;

#[derive(Debug, Default)]
pub struct PresenceSignal {
    notify: Notify,
    closed: AtomicBool,
}

impl PresenceSignal {
    /// Mark the roster as changed. Never blocks; repeated calls before the
    /// loop wakes up coalesce into one pending recomputation.
    pub fn notify_changed(&self) {
        self.notify.notify_one();
    }

    /// Stop the presence loop after its current pass.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the roster has changed since the last wakeup.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Build a snapshot from the registry's current membership.
pub async fn current_snapshot(registry: &Registry) -> PresenceSnapshot {
    PresenceSnapshot::new(registry.snapshot().await)
}

/// Run the presence loop until the registry's signal is closed.
pub async fn run_presence_loop(registry: Arc<Registry>) {
    loop {
        registry.presence().changed().await;
        if registry.presence().is_closed() {
            break;
        }

        let snapshot = current_snapshot(&registry).await;
        let users = snapshot.users.len();
        let outcome = registry.fan_out(OutboundMessage::from(snapshot)).await;

        debug!(
            users,
            delivered = outcome.delivered,
            dropped = outcome.dropped.len(),
            "presence snapshot sent"
        );

        // Let writers pick the snapshot up before a pending change
        // triggers the next pass.
        tokio::task::yield_now().await;
    }

    info!("Presence loop shutting down");
}
