//! Shared types for the relay server.
//!
//! This module defines:
//! - `AppState`: what every handler and connection task gets a handle to
//! - `ConnectionState`: the per-connection lifecycle, used in logs

use std::fmt;
use std::sync::Arc;

use relay_core::Relay;
use tokio::sync::Semaphore;

use crate::accounts::Accounts;
use crate::auth::{Authorizer, InMemorySessions};

/// State shared by the router and all connection tasks.
///
/// Cheap to clone; everything inside is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub authorizer: Arc<dyn Authorizer>,

    pub accounts: Arc<Accounts>,

    /// Upgrades are refused once this many connections are live.
    pub max_clients: usize,

    /// One permit per live connection, taken before the upgrade.
    pub slots: Arc<Semaphore>,
}

impl AppState {
    /// State with a private account directory. Use [`AppState::with_accounts`]
    /// when the authorizer must see the sessions those accounts log into.
    pub fn new(relay: Arc<Relay>, authorizer: Arc<dyn Authorizer>, max_clients: usize) -> Self {
        AppState {
            relay,
            authorizer,
            accounts: Arc::new(Accounts::new(Arc::new(InMemorySessions::new()))),
            max_clients,
            slots: Arc::new(Semaphore::new(max_clients)),
        }
    }

    pub fn with_accounts(mut self, accounts: Arc<Accounts>) -> Self {
        self.accounts = accounts;
        self
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("relay", &self.relay)
            .field("max_clients", &self.max_clients)
            .field("free_slots", &self.slots.available_permits())
            .finish()
    }
}

/// Lifecycle of one connection.
///
/// ```text
/// Connecting -> Upgrading -> Active -> Closing -> Closed
///     |             |
///     +-> Rejected <+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Upgrading,
    Active,
    Closing,
    Closed,
    Rejected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Upgrading => "upgrading",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}
