//! relay-server
//!
//! WebSocket chat relay: upgrade handling, per-connection reader/writer
//! tasks, account login, and the history and health endpoints.

pub mod accounts;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod types;

// internal, not re-exported
mod connection;
