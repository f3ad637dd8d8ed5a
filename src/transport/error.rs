//! Errors surfaced by transport implementations.

use std::error::Error;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection to the broker failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The queue, topic or subscription does not exist
    #[error("entity not found: {0}")]
    EntityNotFound(String),
    /// The lock on a received message expired or was already released
    #[error("message lock lost: {0}")]
    MessageLockLost(String),
    /// The broker rejected the operation
    #[error("rejected by broker: {0}")]
    Rejected(String),
    /// Timeout waiting for the broker
    #[error("transport timeout")]
    Timeout,
    /// Other error
    #[error("transport error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}
