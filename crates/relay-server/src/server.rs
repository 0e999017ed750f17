//! Listener and top-level server wiring.
//!
//! This module:
//! - Builds the shared [`Relay`] and the authorizer for the configured mode.
//! - Binds the configured address/port.
//! - Serves the router until the shutdown future resolves, then stops the
//!   relay's background loops.
//!
//! Per-connection logic lives in `connection`, the HTTP surface in `routes`.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use relay_core::{InMemoryStore, MessageStore, Relay, RelayOptions};

use crate::accounts::Accounts;
use crate::auth::{Authorizer, InMemorySessions, OpenAuthorizer, SessionAuthorizer};
use crate::config::{AuthMode, Config};
use crate::routes::build_router;
use crate::types::AppState;

/// Build the relay and handler state for `config`.
///
/// Must be called from within a Tokio runtime.
pub fn build_state(config: &Config) -> AppState {
    let store: Arc<dyn MessageStore> = Arc::new(InMemoryStore::with_limit(config.history_limit));
    let relay = Arc::new(Relay::start(
        store,
        RelayOptions {
            outbound_capacity: config.outbound_capacity,
        },
    ));

    // Logins and the session authorizer share one table.
    let sessions = Arc::new(InMemorySessions::new());
    let accounts = Arc::new(Accounts::new(sessions.clone()));

    let authorizer: Arc<dyn Authorizer> = match config.auth_mode {
        AuthMode::Open => Arc::new(OpenAuthorizer),
        AuthMode::Session => Arc::new(SessionAuthorizer::new(sessions)),
    };

    AppState::new(relay, authorizer, config.max_clients).with_accounts(accounts)
}

/// Run the server with the given configuration until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let addr = config.socket_addr_string();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind listener on {addr}"))?;

    info!(
        %addr,
        max_clients = config.max_clients,
        outbound_capacity = config.outbound_capacity,
        auth_mode = %config.auth_mode,
        "relay listening"
    );

    let state = build_state(&config);
    serve(listener, state, &config.allowed_origins, shutdown_signal()).await
}

/// Serve on an already bound listener. Split out from [`run`] so tests can
/// bind an ephemeral port and pick their own shutdown trigger.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    allowed_origins: &[String],
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let relay = state.relay.clone();
    let app = build_router(state, allowed_origins);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server error");

    relay.shutdown().await;
    info!("relay shut down");
    result
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        error!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
