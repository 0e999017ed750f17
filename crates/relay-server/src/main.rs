//! Binary WebSocket server for the chat relay.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_server::config::Config;
use relay_server::server;

/// Real-time chat relay
#[derive(Parser, Debug)]
#[command(name = "relay-server", version, about = "WebSocket chat relay server")]
struct Cli {
    /// Bind address (overrides RELAY_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides RELAY_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut config = Config::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(
        "Starting relay-server v{} on {} (max_clients = {})",
        env!("CARGO_PKG_VERSION"),
        config.socket_addr_string(),
        config.max_clients
    );

    server::run(config).await
}
