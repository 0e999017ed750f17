//! Configuration for the relay server.
//!
//! Defaults can be overridden via environment variables:
//!
//! - `RELAY_BIND_ADDR`         (default: "0.0.0.0")
//! - `RELAY_PORT`              (default: "8080")
//! - `RELAY_MAX_CLIENTS`       (default: "1024")
//! - `RELAY_OUTBOUND_CAPACITY` (default: "1")
//! - `RELAY_HISTORY_LIMIT`     (default: "1000", 0 keeps everything)
//! - `RELAY_ALLOWED_ORIGINS`   (default: "http://localhost:3000", comma-separated)
//! - `RELAY_AUTH_MODE`         (default: "open", or "session")
//!
//! The binary lets command-line flags override a few of these.

use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// How upgrade requests are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Anyone may connect; display name comes from `?displayName=`.
    Open,

    /// Session cookie plus CSRF token.
    Session,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(AuthMode::Open),
            "session" => Ok(AuthMode::Session),
            other => bail!("unknown auth mode {other:?} (expected \"open\" or \"session\")"),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Open => write!(f, "open"),
            AuthMode::Session => write!(f, "session"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    /// Per-client outbound queue size. 1 is a pure handoff slot.
    pub outbound_capacity: usize,

    /// Messages kept by the in-memory history store; 0 means unbounded.
    pub history_limit: usize,

    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,

    pub auth_mode: AuthMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            max_clients: 1024,
            outbound_capacity: 1,
            history_limit: 1000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            auth_mode: AuthMode::Open,
        }
    }
}

impl Config {
    /// Construct a `Config` from environment variables, falling back
    /// to the defaults above.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let bind_addr = env::var("RELAY_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let port = read_env_or_default("RELAY_PORT", defaults.port)?;
        let max_clients = read_env_or_default("RELAY_MAX_CLIENTS", defaults.max_clients)?;
        let outbound_capacity =
            read_env_or_default("RELAY_OUTBOUND_CAPACITY", defaults.outbound_capacity)?;
        let history_limit = read_env_or_default("RELAY_HISTORY_LIMIT", defaults.history_limit)?;
        let allowed_origins = match env::var("RELAY_ALLOWED_ORIGINS") {
            Ok(val) => parse_origins(&val),
            Err(_) => defaults.allowed_origins,
        };
        let auth_mode = read_env_or_default("RELAY_AUTH_MODE", defaults.auth_mode)?;

        let config = Config {
            bind_addr,
            port,
            max_clients,
            outbound_capacity,
            history_limit,
            allowed_origins,
            auth_mode,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.outbound_capacity == 0 {
            bail!("outbound capacity must be at least 1");
        }
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        Ok(())
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value {val:?} for {key}")),
        Err(_) => Ok(default),
    }
}

