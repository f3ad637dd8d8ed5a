//! Sending side of the transport.

use std::any::Any;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::TransportError;
use crate::client::ClientType;
use crate::message::ServiceBusMessage;

/// Options for [`MessageSender::create_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateBatchOptions {
    /// Requested maximum batch size. `None` uses the transport maximum.
    pub max_size_in_bytes: Option<u64>,
}

/// A size-bounded batch of messages owned by one sender.
///
/// Batches may hold transport buffers; dropping the batch releases them.
pub trait MessageBatch: Send + Sync {
    /// Add a message if it fits, otherwise hand it back.
    fn try_add(&mut self, message: ServiceBusMessage) -> Result<(), ServiceBusMessage>;

    /// Number of messages in the batch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current encoded size of the batch.
    fn size_in_bytes(&self) -> usize;

    /// Size the batch may not exceed.
    fn max_size_in_bytes(&self) -> usize;

    /// Lets the transport that created the batch recover its concrete type
    /// in `send_batch`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// A client bound to one queue or topic.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Resource kind this sender writes to (`Queue` or `Topic`).
    fn client_type(&self) -> ClientType;

    /// Entity path this sender writes to.
    fn entity_path(&self) -> &str;

    /// Create an empty batch.
    async fn create_batch(
        &self,
        options: CreateBatchOptions,
    ) -> Result<Box<dyn MessageBatch>, TransportError>;

    /// Send a batch. The batch is consumed whatever the outcome.
    async fn send_batch(&self, batch: Box<dyn MessageBatch>) -> Result<(), TransportError>;

    /// Send messages without size-aware batching.
    async fn send_messages(&self, messages: Vec<ServiceBusMessage>) -> Result<(), TransportError>;

    /// Schedule messages for a future enqueue time. Returns one sequence
    /// number per message, in order.
    async fn schedule_messages(
        &self,
        messages: Vec<ServiceBusMessage>,
        enqueue_time: DateTime<Utc>,
    ) -> Result<Vec<i64>, TransportError>;

    /// Cancel previously scheduled messages.
    async fn cancel_scheduled_messages(&self, sequence_numbers: &[i64])
        -> Result<(), TransportError>;

    /// Release the underlying link.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
