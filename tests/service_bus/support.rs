//! Test domain: order payloads, recording handlers and listeners.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sourced_servicebus::transport::{ClientFactory, InMemoryTransport, MessageSender, TransportError};
use sourced_servicebus::{
    async_trait, CancellationToken, ClientOptions, ClientType, ExecutionInfo, ExecutionListener,
    FailedToProcessMessage, HandlerContext, HandlerError, MessageHandler, Payload,
    ProcessMessageArgs, ReceptionError, ServiceBus, ServiceBusMessage, PAYLOAD_TYPE_ID_PROPERTY,
};

/// Integration event: an order was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Payload)]
#[payload(type_id = "OrderCreated")]
pub struct Order {
    pub id: String,
    pub amount: u32,
}

impl Order {
    pub fn new(id: &str, amount: u32) -> Self {
        Self {
            id: id.to_string(),
            amount,
        }
    }
}

/// Integration event: an order left the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Payload)]
pub struct OrderShipped {
    pub id: String,
}

/// What a handler saw for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Handled<T> {
    pub payload: T,
    pub message_id: String,
    pub correlation_id: Option<String>,
}

/// Records every payload it handles.
pub struct Recorder<T> {
    handled: Arc<Mutex<Vec<Handled<T>>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            handled: Arc::clone(&self.handled),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            handled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handled(&self) -> Vec<Handled<T>> {
        self.handled.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<T> {
        self.handled().into_iter().map(|h| h.payload).collect()
    }

    pub fn count(&self) -> usize {
        self.handled.lock().unwrap().len()
    }
}

#[async_trait]
impl<T: Payload + Clone> MessageHandler<T> for Recorder<T> {
    async fn handle(&self, payload: T, context: HandlerContext) -> Result<(), HandlerError> {
        self.handled.lock().unwrap().push(Handled {
            payload,
            message_id: context.message_id().to_string(),
            correlation_id: context.correlation_id().map(str::to_string),
        });
        Ok(())
    }
}

/// Ships every order it handles, by publishing `OrderShipped`.
pub struct ShipOrders;

#[async_trait]
impl MessageHandler<Order> for ShipOrders {
    async fn handle(&self, order: Order, context: HandlerContext) -> Result<(), HandlerError> {
        context.publish(OrderShipped { id: order.id });
        Ok(())
    }
}

/// Publishes, then fails.
pub struct RejectOrders;

#[async_trait]
impl MessageHandler<Order> for RejectOrders {
    async fn handle(&self, order: Order, context: HandlerContext) -> Result<(), HandlerError> {
        context.publish(OrderShipped { id: order.id.clone() });
        Err(HandlerError::rejected(format!("order {} has no stock", order.id)))
    }
}

/// Records listener callbacks as `"start:<message id>"`, `"success:..."`,
/// `"failed:..."`.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ExecutionListener for RecordingListener {
    fn on_execution_start(&self, info: &ExecutionInfo) {
        self.events.lock().unwrap().push(format!("start:{}", info.message_id));
    }

    fn on_execution_success(&self, info: &ExecutionInfo, _elapsed: Duration) {
        self.events.lock().unwrap().push(format!("success:{}", info.message_id));
    }

    fn on_execution_failed(&self, info: &ExecutionInfo, _error: &ReceptionError) {
        self.events.lock().unwrap().push(format!("failed:{}", info.message_id));
    }
}

/// Client factory whose connection is always down.
pub struct UnreachableBroker;

#[async_trait]
impl ClientFactory for UnreachableBroker {
    async fn create_sender(
        &self,
        options: &ClientOptions,
    ) -> Result<Arc<dyn MessageSender>, TransportError> {
        Err(TransportError::ConnectionFailed(format!(
            "cannot reach broker for {}",
            options.resource_id()
        )))
    }
}

/// A message as another service would have sent it.
pub fn incoming(message_id: &str, payload_type_id: &str, body: &str) -> ServiceBusMessage {
    let mut message = ServiceBusMessage::new(message_id, body.as_bytes().to_vec())
        .with_property(PAYLOAD_TYPE_ID_PROPERTY, payload_type_id);
    message.content_type = Some("application/json".to_string());
    message.correlation_id = Some(format!("corr-{}", message_id));
    message
}

/// Lock every pending message of `entity_path` and run it through the bus.
pub async fn process_pending(
    bus: &ServiceBus,
    transport: &InMemoryTransport,
    client_type: ClientType,
    entity_path: &str,
) -> Vec<Result<(), FailedToProcessMessage>> {
    process_pending_with(bus, transport, client_type, entity_path, CancellationToken::new()).await
}

/// Same as [`process_pending`], under the given cancellation token.
pub async fn process_pending_with(
    bus: &ServiceBus,
    transport: &InMemoryTransport,
    client_type: ClientType,
    entity_path: &str,
    cancellation: CancellationToken,
) -> Vec<Result<(), FailedToProcessMessage>> {
    let receiver = transport.receiver(entity_path);
    let mut results = Vec::new();
    for message in receiver.try_receive(usize::MAX) {
        let args = ProcessMessageArgs::new(
            client_type,
            entity_path,
            message,
            Arc::new(receiver.clone()),
        )
        .with_cancellation(cancellation.clone());
        results.push(bus.process_message(args).await);
    }
    results
}
