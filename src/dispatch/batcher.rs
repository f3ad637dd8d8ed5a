//! Message Batcher: pack messages for one sender into size-bounded batches.

use tracing::trace;

use super::DispatchError;
use crate::message::ServiceBusMessage;
use crate::settings::DEFAULT_SCHEDULE_PAGE_SIZE;
use crate::transport::{CreateBatchOptions, MessageBatch, MessageSender};

/// Partitions messages into batches or scheduling pages.
///
/// Order is preserved and nothing is dropped: a message that does not fit
/// even in an empty batch is an error.
#[derive(Debug, Clone, Copy)]
pub struct MessageBatcher {
    max_batch_size_in_bytes: Option<u64>,
    page_size: usize,
}

impl Default for MessageBatcher {
    fn default() -> Self {
        Self::new(None, DEFAULT_SCHEDULE_PAGE_SIZE)
    }
}

impl MessageBatcher {
    /// `max_batch_size_in_bytes` is passed to the transport when creating
    /// batches; `page_size` bounds scheduling pages.
    pub fn new(max_batch_size_in_bytes: Option<u64>, page_size: usize) -> Self {
        Self {
            max_batch_size_in_bytes,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fill transport batches in order, opening a new batch whenever the
    /// current one rejects a message.
    pub async fn create_batches(
        &self,
        sender: &dyn MessageSender,
        resource_id: &str,
        messages: Vec<ServiceBusMessage>,
    ) -> Result<Vec<Box<dyn MessageBatch>>, DispatchError> {
        let mut batches = Vec::new();
        let mut current = self.new_batch(sender, resource_id).await?;

        for message in messages {
            let message = match current.try_add(message) {
                Ok(()) => continue,
                Err(message) => message,
            };

            if current.is_empty() {
                return Err(too_large(&message, resource_id, current.as_ref()));
            }

            trace!(
                resource_id,
                messages = current.len(),
                size = current.size_in_bytes(),
                "batch full"
            );
            batches.push(std::mem::replace(
                &mut current,
                self.new_batch(sender, resource_id).await?,
            ));

            if let Err(message) = current.try_add(message) {
                return Err(too_large(&message, resource_id, current.as_ref()));
            }
        }

        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    /// Split messages into pages of at most `page_size`, for the scheduling
    /// path where the transport has no size-aware batch.
    pub fn paginate(&self, messages: Vec<ServiceBusMessage>) -> Vec<Vec<ServiceBusMessage>> {
        let mut pages = Vec::with_capacity(messages.len().div_ceil(self.page_size));
        let mut messages = messages.into_iter().peekable();
        while messages.peek().is_some() {
            pages.push(messages.by_ref().take(self.page_size).collect());
        }
        pages
    }

    async fn new_batch(
        &self,
        sender: &dyn MessageSender,
        resource_id: &str,
    ) -> Result<Box<dyn MessageBatch>, DispatchError> {
        sender
            .create_batch(CreateBatchOptions {
                max_size_in_bytes: self.max_batch_size_in_bytes,
            })
            .await
            .map_err(|source| DispatchError::transport(resource_id, source))
    }
}

fn too_large(
    message: &ServiceBusMessage,
    resource_id: &str,
    batch: &dyn MessageBatch,
) -> DispatchError {
    DispatchError::MessageTooLarge {
        message_id: message.message_id.clone(),
        resource_id: resource_id.to_string(),
        size: message.size_in_bytes(),
        max_size: batch.max_size_in_bytes(),
    }
}
