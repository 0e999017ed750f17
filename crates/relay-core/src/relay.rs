//! Top-level wiring of the relay core.
//!
//! A [`Relay`] is built once at startup and shared (behind an `Arc`) with
//! every connection. It owns:
//! - the [`Registry`],
//! - the submission side of the [`Dispatcher`],
//! - the background tasks: dispatch loop, presence loop, persistence loop.
//!
//! Nothing here is process-global, so tests can run as many isolated
//! relays as they like.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::client::{ClientHandle, OutboundRx};
use crate::dispatcher::{run_dispatch_loop, run_persistence_loop, Dispatcher};
use crate::presence::run_presence_loop;
use crate::registry::Registry;
use crate::store::MessageStore;

/// Tunables for a [`Relay`].
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Size of each client's outbound queue. `1` is a pure handoff slot:
    /// a client whose writer has not picked up the previous message is
    /// dropped on the next one.
    pub outbound_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions { outbound_capacity: 1 }
    }
}

pub struct Relay {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    store: Arc<dyn MessageStore>,
    options: RelayOptions,
    running: Mutex<Option<Running>>,
}

/// Handles to the background loops while the relay is up.
struct Running {
    stop_dispatch: oneshot::Sender<()>,
    dispatch: JoinHandle<()>,
    persistence: JoinHandle<()>,
    presence: JoinHandle<()>,
}

impl Relay {
    /// Create the registry and spawn the background loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(store: Arc<dyn MessageStore>, options: RelayOptions) -> Self {
        let registry = Arc::new(Registry::new());
        let (dispatcher, dispatch_rx) = Dispatcher::channel();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (stop_dispatch, stop_rx) = oneshot::channel();

        let running = Running {
            stop_dispatch,
            persistence: tokio::spawn(run_persistence_loop(persist_rx, store.clone())),
            dispatch: tokio::spawn(run_dispatch_loop(
                dispatch_rx,
                registry.clone(),
                persist_tx,
                stop_rx,
            )),
            presence: tokio::spawn(run_presence_loop(registry.clone())),
        };

        Relay {
            registry,
            dispatcher,
            store,
            options,
            running: Mutex::new(Some(running)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Allocate a client record sized per [`RelayOptions`]. The client is
    /// not registered yet.
    pub fn open_client(&self, display_name: Option<&str>) -> (ClientHandle, OutboundRx) {
        ClientHandle::new(
            self.registry.next_client_id(),
            display_name,
            self.options.outbound_capacity,
        )
    }

    /// Stop the background loops.
    ///
    /// New submissions are refused right away (`DispatcherClosed`). Messages
    /// already submitted are still fanned out and saved before this returns.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let Some(running) = self.take_running() else {
            return;
        };

        self.registry.presence().close();
        let _ = running.stop_dispatch.send(());

        // The persistence loop ends once the dispatch loop has dropped its
        // feed, so wait for them in that order.
        for (name, task) in [
            ("dispatch", running.dispatch),
            ("persistence", running.persistence),
            ("presence", running.presence),
        ] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "relay task ended abnormally");
            }
        }
    }

    fn take_running(&self) -> Option<Running> {
        match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for Relay {
    /// Without an executor to wait on, just tell the loops to stop. Dropping
    /// `stop_dispatch` closes intake, and the loops drain on their own.
    fn drop(&mut self) {
        if self.take_running().is_some() {
            self.registry.presence().close();
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("options", &self.options)
            .finish()
    }
}
