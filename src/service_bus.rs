//! Composition: declare registrations, build the bus, publish and process.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use sourced_servicebus::transport::InMemoryTransport;
//! use sourced_servicebus::{
//!     ClientOptions, ClientType, HandlerContext, HandlerError, Payload, ProcessMessageArgs,
//!     ServiceBusBuilder, ServiceBusSettings,
//! };
//!
//! #[derive(Serialize, Deserialize, Payload)]
//! struct OrderPlaced {
//!     id: String,
//! }
//!
//! futures::executor::block_on(async {
//!     let transport = InMemoryTransport::new();
//!     let bus = ServiceBusBuilder::new(ServiceBusSettings::default())
//!         .dispatch::<OrderPlaced>(ClientOptions::queue("orders"))
//!         .receive::<OrderPlaced, _>(
//!             ClientOptions::queue("orders"),
//!             |order: OrderPlaced, _context: HandlerContext| async move {
//!                 assert_eq!(order.id, "o-1");
//!                 Ok::<(), HandlerError>(())
//!             },
//!         )
//!         .build(Arc::new(transport.clone()))
//!         .await
//!         .unwrap();
//!
//!     bus.publisher()
//!         .publish(OrderPlaced { id: "o-1".into() })
//!         .await
//!         .unwrap();
//!
//!     let receiver = transport.receiver("orders");
//!     for message in receiver.try_receive(10) {
//!         let args = ProcessMessageArgs::new(
//!             ClientType::Queue,
//!             "orders",
//!             message,
//!             Arc::new(receiver.clone()),
//!         );
//!         bus.process_message(args).await.unwrap();
//!     }
//! });
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ClientOptions, ClientType};
use crate::dispatch::{
    Dispatch, DispatchError, DispatchSender, MessageBatcher, MessageFactory, ScheduledDispatch,
};
use crate::message::InboundMessage;
use crate::payload::Payload;
use crate::reception::{
    ExecutionListener, FailedToProcessMessage, IsolationRouter, MessageHandler,
    ProcessMessageArgs, ReceptionPipeline,
};
use crate::registry::{
    CompositionError, DispatchRegistrationBuilder, DispatchRegistry, MessageDispatchRegistration,
    MessageReceptionRegistration, ReceptionRegistry, RegistrationError, ResourceAllocator,
    ServiceBusRegistry,
};
use crate::serializer::{JsonPayloadSerializer, PayloadSerializer};
use crate::settings::ServiceBusSettings;
use crate::transport::{ClientFactory, TransportError};

// ============================================================================
// Builder
// ============================================================================

/// Declares dispatch and reception registrations, then builds a [`ServiceBus`].
///
/// Registrations capture the serializer current at the time they are
/// declared. Invalid registrations are reported by [`build`](Self::build).
pub struct ServiceBusBuilder<S = JsonPayloadSerializer> {
    settings: ServiceBusSettings,
    serializer: Arc<S>,
    allocator: ResourceAllocator,
    dispatches: Vec<MessageDispatchRegistration>,
    receptions: Vec<MessageReceptionRegistration>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl ServiceBusBuilder<JsonPayloadSerializer> {
    /// Builder using JSON bodies.
    pub fn new(settings: ServiceBusSettings) -> Self {
        Self {
            allocator: ResourceAllocator::new(settings.connection.clone()),
            settings,
            serializer: Arc::new(JsonPayloadSerializer),
            dispatches: Vec::new(),
            receptions: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

impl<S: PayloadSerializer> ServiceBusBuilder<S> {
    /// Use `serializer` for the registrations declared from now on.
    pub fn with_serializer<S2: PayloadSerializer>(self, serializer: S2) -> ServiceBusBuilder<S2> {
        ServiceBusBuilder {
            settings: self.settings,
            serializer: Arc::new(serializer),
            allocator: self.allocator,
            dispatches: self.dispatches,
            receptions: self.receptions,
            listeners: self.listeners,
        }
    }

    /// Send every dispatched `T` to `options`.
    pub fn dispatch<T: Payload>(self, options: ClientOptions) -> Self {
        self.dispatch_with::<T, _>(options, |registration| registration)
    }

    /// Send every dispatched `T` to `options`, customizing the registration.
    ///
    /// ```ignore
    /// builder.dispatch_with::<OrderPlaced, _>(ClientOptions::topic("events"), |registration| {
    ///     registration
    ///         .payload_type_id("OrderCreated")
    ///         .customize_outgoing_message(|message, order| {
    ///             message.session_id = Some(order.customer_id.clone());
    ///         })
    /// })
    /// ```
    pub fn dispatch_with<T, F>(mut self, options: ClientOptions, configure: F) -> Self
    where
        T: Payload,
        F: FnOnce(DispatchRegistrationBuilder<T>) -> DispatchRegistrationBuilder<T>,
    {
        let options = self.allocator.allocate(options);
        let builder = DispatchRegistrationBuilder::new(options, Arc::clone(&self.serializer));
        self.dispatches.push(configure(builder).build());
        self
    }

    /// Handle `T` received on `options` with `handler`.
    pub fn receive<T, H>(self, options: ClientOptions, handler: H) -> Self
    where
        T: Payload,
        H: MessageHandler<T>,
    {
        self.receive_with::<T, H, _>(options, handler, |registration| registration)
    }

    /// Handle `T` received on `options`, customizing the registration
    /// (typically its payload type id).
    pub fn receive_with<T, H, F>(mut self, options: ClientOptions, handler: H, configure: F) -> Self
    where
        T: Payload,
        H: MessageHandler<T>,
        F: FnOnce(MessageReceptionRegistration) -> MessageReceptionRegistration,
    {
        let options = self.allocator.allocate(options);
        let registration = MessageReceptionRegistration::new::<T, H, S>(
            options,
            Arc::new(handler),
            Arc::clone(&self.serializer),
        );
        self.receptions.push(configure(registration));
        self
    }

    /// Observe every message execution.
    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate every registration, create one sender per dispatch resource
    /// and wire the pipelines.
    pub async fn build(self, client_factory: Arc<dyn ClientFactory>) -> Result<ServiceBus, CompositionError> {
        let dispatch_registry = DispatchRegistry::new(self.dispatches)?;

        let mut reception_registry = ReceptionRegistry::new();
        for registration in self.receptions {
            if registration.client_type() == ClientType::Topic {
                return Err(RegistrationError::InvalidReceptionSource {
                    resource_id: registration.resource_id().to_string(),
                }
                .into());
            }
            reception_registry.register(registration)?;
        }

        let mut registry = ServiceBusRegistry::new();
        let mut created = HashSet::new();
        for registration in dispatch_registry.registrations() {
            let options = registration.options();
            if !created.insert((options.client_type(), options.resource_id().to_string())) {
                continue;
            }
            let sender = client_factory.create_sender(options).await.map_err(|source| {
                CompositionError::SenderCreation {
                    client_type: options.client_type(),
                    resource_id: options.resource_id().to_string(),
                    source,
                }
            })?;
            debug!(
                client_type = %options.client_type(),
                resource_id = options.resource_id(),
                entity_path = sender.entity_path(),
                "sender created"
            );
            registry.register_sender(Arc::clone(options), sender);
        }
        for registration in reception_registry.registrations() {
            registry.register_receiver(Arc::clone(registration.options()));
        }

        info!(
            dispatch_registrations = dispatch_registry.len(),
            reception_registrations = reception_registry.len(),
            senders = registry.senders().count(),
            receivers = registry.receivers().count(),
            isolation = ?self.settings.isolation.behavior,
            "service bus composed"
        );

        let registry = Arc::new(registry);
        let dispatch_registry = Arc::new(dispatch_registry);
        let reception_registry = Arc::new(reception_registry);

        let dispatch_sender = Arc::new(DispatchSender::new(
            MessageFactory::new(Arc::clone(&dispatch_registry), self.settings.isolation.clone()),
            MessageBatcher::new(
                self.settings.max_batch_size_in_bytes,
                self.settings.schedule_page_size,
            ),
            Arc::clone(&registry),
        ));

        let router = IsolationRouter::new(
            Arc::clone(&registry),
            client_factory,
            self.settings.connection.clone(),
        );
        let pipeline = self.listeners.into_iter().fold(
            ReceptionPipeline::new(
                Arc::clone(&reception_registry),
                self.settings.isolation.clone(),
                router,
                Arc::clone(&dispatch_sender),
            ),
            ReceptionPipeline::with_listener,
        );

        Ok(ServiceBus {
            settings: self.settings,
            registry,
            dispatch_registry,
            reception_registry,
            dispatch_sender,
            pipeline,
        })
    }
}

// ============================================================================
// Service bus
// ============================================================================

/// A composed service bus.
pub struct ServiceBus {
    settings: ServiceBusSettings,
    registry: Arc<ServiceBusRegistry>,
    dispatch_registry: Arc<DispatchRegistry>,
    reception_registry: Arc<ReceptionRegistry>,
    dispatch_sender: Arc<DispatchSender>,
    pipeline: ReceptionPipeline,
}

impl ServiceBus {
    /// Handle for sending and scheduling dispatches.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            sender: Arc::clone(&self.dispatch_sender),
            inbound: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Route one received message to its handler. Called by the transport's
    /// receive loop; settling the message on success or failure is up to it.
    pub async fn process_message(&self, args: ProcessMessageArgs) -> Result<(), FailedToProcessMessage> {
        self.pipeline.process(args).await
    }

    pub fn settings(&self) -> &ServiceBusSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ServiceBusRegistry {
        &self.registry
    }

    pub fn dispatch_registry(&self) -> &DispatchRegistry {
        &self.dispatch_registry
    }

    pub fn reception_registry(&self) -> &ReceptionRegistry {
        &self.reception_registry
    }

    /// Resources this process receives from, for wiring receive loops.
    pub fn receivers(&self) -> impl Iterator<Item = &Arc<ClientOptions>> {
        self.registry.receivers()
    }

    /// Close every sender.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.registry.close_all().await?;
        info!("service bus closed");
        Ok(())
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Sends dispatches through a [`ServiceBus`].
///
/// Cheap to clone. Outside a handler, attach the message being handled with
/// [`with_inbound`](Self::with_inbound) to propagate its correlation id and
/// isolation identity; inside a handler use
/// [`HandlerContext::publish`](crate::HandlerContext::publish) instead.
#[derive(Clone, Debug)]
pub struct Publisher {
    sender: Arc<DispatchSender>,
    inbound: Option<InboundMessage>,
    cancellation: CancellationToken,
}

impl Publisher {
    pub fn with_inbound(mut self, inbound: InboundMessage) -> Self {
        self.inbound = Some(inbound);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Send one payload to every destination registered for its type.
    pub async fn publish<T: Payload>(&self, payload: T) -> Result<(), DispatchError> {
        self.publish_dispatches(&[Dispatch::new(payload)]).await
    }

    pub async fn publish_dispatches(&self, dispatches: &[Dispatch]) -> Result<(), DispatchError> {
        self.sender
            .send_dispatches(dispatches, self.inbound.as_ref(), &self.cancellation)
            .await
    }

    /// Schedule one payload for `enqueue_time`.
    pub async fn schedule<T: Payload>(
        &self,
        payload: T,
        enqueue_time: DateTime<Utc>,
    ) -> Result<Vec<ScheduledDispatch>, DispatchError> {
        self.schedule_dispatches(&[Dispatch::new(payload)], enqueue_time)
            .await
    }

    pub async fn schedule_dispatches(
        &self,
        dispatches: &[Dispatch],
        enqueue_time: DateTime<Utc>,
    ) -> Result<Vec<ScheduledDispatch>, DispatchError> {
        self.sender
            .schedule_dispatches(dispatches, enqueue_time, self.inbound.as_ref(), &self.cancellation)
            .await
    }

    /// Cancel dispatches returned by a schedule call.
    pub async fn cancel_scheduled(&self, scheduled: &[ScheduledDispatch]) -> Result<(), DispatchError> {
        self.sender
            .cancel_scheduled(scheduled, &self.cancellation)
            .await
    }
}
