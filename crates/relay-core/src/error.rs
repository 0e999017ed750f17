//! Error types for the relay core.
//!
//! Registry operations are infallible. What can fail is handing a
//! message to something that has gone away or cannot keep up.

use thiserror::Error;

use crate::client::ClientId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The dispatcher loop is gone; nothing more can be submitted.
    #[error("dispatcher loop has shut down")]
    DispatcherClosed,

    /// The client's outbound slot is occupied; its writer is not keeping up.
    #[error("client {0} is not ready to accept a message")]
    Backpressure(ClientId),

    /// The client's writer task has stopped.
    #[error("client {0} outbound queue is closed")]
    Disconnected(ClientId),
}
