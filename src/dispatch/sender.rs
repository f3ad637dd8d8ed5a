//! Dispatch Sender: factory → group per resource → batch → send.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Dispatch, DispatchError, MessageBatcher, MessageFactory};
use crate::client::ClientType;
use crate::message::{InboundMessage, ServiceBusMessage};
use crate::registry::ServiceBusRegistry;
use crate::transport::MessageSender;

/// A message scheduled for later delivery, kept to cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDispatch {
    pub client_type: ClientType,
    pub resource_id: String,
    pub message_id: String,
    pub sequence_number: i64,
}

/// Messages for one destination resource, in creation order.
struct ResourceGroup {
    client_type: ClientType,
    resource_id: String,
    sender: Arc<dyn MessageSender>,
    messages: Vec<ServiceBusMessage>,
}

/// Sends dispatches through the registered senders.
///
/// Distinct resources are served concurrently; batches and pages for one
/// resource go out one after the other, in order.
#[derive(Debug)]
pub struct DispatchSender {
    factory: MessageFactory,
    batcher: MessageBatcher,
    registry: Arc<ServiceBusRegistry>,
}

impl DispatchSender {
    pub fn new(
        factory: MessageFactory,
        batcher: MessageBatcher,
        registry: Arc<ServiceBusRegistry>,
    ) -> Self {
        Self {
            factory,
            batcher,
            registry,
        }
    }

    /// Send now.
    pub async fn send_dispatches(
        &self,
        dispatches: &[Dispatch],
        inbound: Option<&InboundMessage>,
        cancellation: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let groups = self.group(dispatches, inbound)?;
        let results = join_all(
            groups
                .into_iter()
                .map(|group| self.send_group(group, cancellation)),
        )
        .await;

        results.into_iter().collect()
    }

    /// Schedule for `enqueue_time`, in pages of at most the configured page size.
    pub async fn schedule_dispatches(
        &self,
        dispatches: &[Dispatch],
        enqueue_time: DateTime<Utc>,
        inbound: Option<&InboundMessage>,
        cancellation: &CancellationToken,
    ) -> Result<Vec<ScheduledDispatch>, DispatchError> {
        let groups = self.group(dispatches, inbound)?;
        let results = join_all(
            groups
                .into_iter()
                .map(|group| self.schedule_group(group, enqueue_time, cancellation)),
        )
        .await;

        let mut scheduled = Vec::new();
        let mut first_error = None;
        for (handles, error) in results {
            scheduled.extend(handles);
            if first_error.is_none() {
                first_error = error;
            }
        }

        match first_error {
            None => Ok(scheduled),
            Some(error) if scheduled.is_empty() => Err(error),
            Some(error) => {
                warn!(
                    scheduled = scheduled.len(),
                    %error,
                    "scheduling partially failed"
                );
                Err(DispatchError::PartialSchedule {
                    scheduled,
                    source: Box::new(error),
                })
            }
        }
    }

    /// Cancel previously scheduled dispatches, one call per resource.
    pub async fn cancel_scheduled(
        &self,
        scheduled: &[ScheduledDispatch],
        cancellation: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let mut groups: Vec<(ClientType, &str, Vec<i64>)> = Vec::new();
        for entry in scheduled {
            match groups.iter_mut().find(|(client_type, resource_id, _)| {
                *client_type == entry.client_type && *resource_id == entry.resource_id
            }) {
                Some((_, _, sequence_numbers)) => sequence_numbers.push(entry.sequence_number),
                None => groups.push((
                    entry.client_type,
                    &entry.resource_id,
                    vec![entry.sequence_number],
                )),
            }
        }

        for (client_type, resource_id, sequence_numbers) in groups {
            let sender = self.resolve_sender(client_type, resource_id)?;
            check_cancelled(cancellation)?;
            sender
                .cancel_scheduled_messages(&sequence_numbers)
                .await
                .map_err(|source| DispatchError::transport(resource_id, source))?;
            debug!(
                %client_type,
                resource_id,
                count = sequence_numbers.len(),
                "scheduled messages cancelled"
            );
        }
        Ok(())
    }

    /// Build messages and group them per destination in first-seen order.
    fn group(
        &self,
        dispatches: &[Dispatch],
        inbound: Option<&InboundMessage>,
    ) -> Result<Vec<ResourceGroup>, DispatchError> {
        let mut groups: Vec<ResourceGroup> = Vec::new();

        for outgoing in self.factory.create_messages(dispatches, inbound)? {
            let client_type = outgoing.registration.client_type();
            let resource_id = outgoing.registration.resource_id();

            match groups
                .iter_mut()
                .find(|group| group.client_type == client_type && group.resource_id == resource_id)
            {
                Some(group) => group.messages.push(outgoing.message),
                None => groups.push(ResourceGroup {
                    client_type,
                    resource_id: resource_id.to_string(),
                    sender: self.resolve_sender(client_type, resource_id)?,
                    messages: vec![outgoing.message],
                }),
            }
        }

        Ok(groups)
    }

    fn resolve_sender(
        &self,
        client_type: ClientType,
        resource_id: &str,
    ) -> Result<Arc<dyn MessageSender>, DispatchError> {
        match self.registry.get_sender(client_type, resource_id) {
            Some(registered) => Ok(Arc::clone(&registered.sender)),
            None if client_type == ClientType::Queue => Err(DispatchError::QueueSenderNotFound {
                resource_id: resource_id.to_string(),
            }),
            None => Err(DispatchError::TopicSenderNotFound {
                resource_id: resource_id.to_string(),
            }),
        }
    }

    async fn send_group(
        &self,
        group: ResourceGroup,
        cancellation: &CancellationToken,
    ) -> Result<(), DispatchError> {
        check_cancelled(cancellation)?;
        let total = group.messages.len();
        let batches = self
            .batcher
            .create_batches(group.sender.as_ref(), &group.resource_id, group.messages)
            .await?;
        let batch_count = batches.len();

        for batch in batches {
            check_cancelled(cancellation)?;
            let size = batch.len();
            group
                .sender
                .send_batch(batch)
                .await
                .map_err(|source| DispatchError::transport(&group.resource_id, source))?;
            debug!(
                client_type = %group.client_type,
                resource_id = %group.resource_id,
                messages = size,
                "batch sent"
            );
        }

        info!(
            client_type = %group.client_type,
            resource_id = %group.resource_id,
            messages = total,
            batches = batch_count,
            "messages sent"
        );
        Ok(())
    }

    /// Schedule one group page by page. Handles of the pages already
    /// scheduled come back even when a later page fails.
    async fn schedule_group(
        &self,
        group: ResourceGroup,
        enqueue_time: DateTime<Utc>,
        cancellation: &CancellationToken,
    ) -> (Vec<ScheduledDispatch>, Option<DispatchError>) {
        let mut scheduled = Vec::with_capacity(group.messages.len());

        for page in self.batcher.paginate(group.messages) {
            if let Err(error) = check_cancelled(cancellation) {
                return (scheduled, Some(error));
            }
            let message_ids: Vec<String> = page.iter().map(|m| m.message_id.clone()).collect();
            let sequence_numbers = match group.sender.schedule_messages(page, enqueue_time).await {
                Ok(sequence_numbers) => sequence_numbers,
                Err(source) => {
                    return (
                        scheduled,
                        Some(DispatchError::transport(&group.resource_id, source)),
                    )
                }
            };
            if sequence_numbers.len() != message_ids.len() {
                return (
                    scheduled,
                    Some(DispatchError::SequenceNumberMismatch {
                        resource_id: group.resource_id.clone(),
                        expected: message_ids.len(),
                        actual: sequence_numbers.len(),
                    }),
                );
            }
            debug!(
                client_type = %group.client_type,
                resource_id = %group.resource_id,
                messages = message_ids.len(),
                %enqueue_time,
                "page scheduled"
            );

            scheduled.extend(message_ids.into_iter().zip(sequence_numbers).map(
                |(message_id, sequence_number)| ScheduledDispatch {
                    client_type: group.client_type,
                    resource_id: group.resource_id.clone(),
                    message_id,
                    sequence_number,
                },
            ));
        }

        (scheduled, None)
    }
}

fn check_cancelled(cancellation: &CancellationToken) -> Result<(), DispatchError> {
    if cancellation.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }
    Ok(())
}
