//! Per-message contexts.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::client::ClientType;
use crate::dispatch::Dispatch;
use crate::message::{InboundMessage, ServiceBusReceivedMessage};
use crate::payload::Payload;
use crate::registry::MessageReceptionRegistration;
use crate::transport::MessageReceiver;

/// Everything the pipeline knows about one received message.
///
/// Built right before the message is routed, dropped once it is handled.
#[derive(Clone)]
pub struct MessageContext {
    client_type: ClientType,
    resource_id: String,
    message: Arc<ServiceBusReceivedMessage>,
    receiver: Arc<dyn MessageReceiver>,
    registration: Option<Arc<MessageReceptionRegistration>>,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub(crate) fn new(
        client_type: ClientType,
        resource_id: String,
        message: ServiceBusReceivedMessage,
        receiver: Arc<dyn MessageReceiver>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            client_type,
            resource_id,
            message: Arc::new(message),
            receiver,
            registration: None,
            cancellation,
        }
    }

    pub(crate) fn with_registration(
        mut self,
        registration: Option<Arc<MessageReceptionRegistration>>,
    ) -> Self {
        self.registration = registration;
        self
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn message(&self) -> &ServiceBusReceivedMessage {
        &self.message
    }

    pub fn receiver(&self) -> &Arc<dyn MessageReceiver> {
        &self.receiver
    }

    /// `None` when no handler is interested in this message.
    pub fn registration(&self) -> Option<&Arc<MessageReceptionRegistration>> {
        self.registration.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn message_id(&self) -> &str {
        self.message.message_id()
    }

    pub fn payload_type_id(&self) -> Option<&str> {
        self.message.payload_type_id()
    }

    pub fn isolation_key(&self) -> Option<&str> {
        self.message.isolation_key()
    }

    pub fn isolation_apps(&self) -> Vec<String> {
        self.message.isolation_apps()
    }

    pub(crate) fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            client_type: self.client_type,
            resource_id: self.resource_id.clone(),
            message: Arc::clone(&self.message),
            cancellation: self.cancellation.clone(),
            publications: Arc::default(),
        }
    }
}

/// What a handler sees besides its payload.
///
/// Dispatches published through the context are buffered and only sent
/// once the handler returns `Ok`. They inherit the correlation id and
/// isolation identity of the message being handled.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    client_type: ClientType,
    resource_id: String,
    message: Arc<ServiceBusReceivedMessage>,
    cancellation: CancellationToken,
    publications: Arc<Mutex<Vec<Dispatch>>>,
}

impl HandlerContext {
    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn message_id(&self) -> &str {
        self.message.message_id()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message.correlation_id()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.message.session_id()
    }

    pub fn payload_type_id(&self) -> Option<&str> {
        self.message.payload_type_id()
    }

    pub fn isolation_key(&self) -> Option<&str> {
        self.message.isolation_key()
    }

    pub fn isolation_apps(&self) -> Vec<String> {
        self.message.isolation_apps()
    }

    pub fn delivery_count(&self) -> u32 {
        self.message.delivery_count
    }

    pub fn enqueued_time(&self) -> DateTime<Utc> {
        self.message.enqueued_time
    }

    /// The raw received message.
    pub fn message(&self) -> &ServiceBusReceivedMessage {
        &self.message
    }

    /// Cancelled when the transport gives up on this message. Handlers
    /// should return early rather than fail.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Publish a payload once the handler succeeds.
    pub fn publish<T: Payload>(&self, payload: T) {
        self.publish_dispatch(Dispatch::new(payload));
    }

    /// Publish a dispatch once the handler succeeds.
    pub fn publish_dispatch(&self, dispatch: Dispatch) {
        self.publications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dispatch);
    }

    /// Number of buffered publications.
    pub fn pending_publications(&self) -> usize {
        self.publications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn take_publications(&self) -> Vec<Dispatch> {
        std::mem::take(
            &mut *self
                .publications
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub(crate) fn inbound(&self) -> InboundMessage {
        InboundMessage::from_received(&self.message)
    }
}
