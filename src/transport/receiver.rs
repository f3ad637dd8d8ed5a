//! Settlement side of the transport.

use async_trait::async_trait;

use super::error::TransportError;
use crate::message::ServiceBusReceivedMessage;

/// Settles messages received from a queue or subscription.
///
/// The receive loop itself belongs to the transport; the core only needs to
/// settle messages it decides not to hand to a handler.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Remove the message from the entity.
    async fn complete_message(&self, message: &ServiceBusReceivedMessage)
        -> Result<(), TransportError>;

    /// Release the lock so the message is redelivered.
    async fn abandon_message(&self, message: &ServiceBusReceivedMessage)
        -> Result<(), TransportError>;

    /// Move the message to the dead-letter sub-queue.
    async fn dead_letter_message(
        &self,
        message: &ServiceBusReceivedMessage,
        reason: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), TransportError>;
}
