//! Sender construction.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::TransportError;
use super::sender::MessageSender;
use crate::client::ClientOptions;

/// Creates senders for queues and topics.
///
/// Used once per dispatch resource at composition, and on demand for the
/// short-lived senders of isolation re-routing.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create a sender for `options.original_resource_id()` on
    /// `options.connection()`.
    async fn create_sender(
        &self,
        options: &ClientOptions,
    ) -> Result<Arc<dyn MessageSender>, TransportError>;
}
