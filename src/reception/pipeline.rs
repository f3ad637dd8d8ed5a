//! Reception Pipeline: one received message → at most one handler.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ExecutionInfo, ExecutionListener, FailedToProcessMessage, HandlerError, IsolationRouter,
    MessageContext, ReceptionError,
};
use crate::client::ClientType;
use crate::dispatch::DispatchSender;
use crate::message::ServiceBusReceivedMessage;
use crate::registry::{MessageReceptionRegistration, ReceptionRegistry};
use crate::settings::IsolationSettings;
use crate::transport::MessageReceiver;

/// How a handler execution ended, short of failing.
enum Execution {
    Completed,
    /// Cancellation was requested; the message stays unsettled.
    Cancelled,
}

/// One received message and where it was received.
pub struct ProcessMessageArgs {
    pub client_type: ClientType,
    /// Logical resource id of the receiving queue or subscription.
    pub resource_id: String,
    pub message: ServiceBusReceivedMessage,
    pub receiver: Arc<dyn MessageReceiver>,
    pub cancellation: CancellationToken,
}

impl ProcessMessageArgs {
    pub fn new(
        client_type: ClientType,
        resource_id: impl Into<String>,
        message: ServiceBusReceivedMessage,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Self {
        Self {
            client_type,
            resource_id: resource_id.into(),
            message,
            receiver,
            cancellation: CancellationToken::new(),
        }
    }

    /// Cancellation signal from the transport's receive context.
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// Routes received messages to their handler.
///
/// ```text
/// message ─► isolation check ──mismatch──► IsolationRouter (done)
///                 │ match
///                 ▼
///          on_execution_start
///                 │
///          PayloadTypeId? ──none──► MissingPayloadTypeId
///                 │
///          registration? ──none──► Ok (ignored)
///                 │
///          deserialize + handle + flush publications
///                 │
///          on_execution_success / on_execution_failed
///          (nothing when cancelled)
/// ```
pub struct ReceptionPipeline {
    registry: Arc<ReceptionRegistry>,
    isolation: IsolationSettings,
    router: IsolationRouter,
    dispatch_sender: Arc<DispatchSender>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl ReceptionPipeline {
    pub fn new(
        registry: Arc<ReceptionRegistry>,
        isolation: IsolationSettings,
        router: IsolationRouter,
        dispatch_sender: Arc<DispatchSender>,
    ) -> Self {
        Self {
            registry,
            isolation,
            router,
            dispatch_sender,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Process one received message.
    ///
    /// Returns once the handler has finished. Failures carry the routing
    /// context and are left to the transport's redelivery policy.
    pub async fn process(&self, args: ProcessMessageArgs) -> Result<(), FailedToProcessMessage> {
        let context = MessageContext::new(
            args.client_type,
            args.resource_id,
            args.message,
            args.receiver,
            args.cancellation,
        );

        if !self.isolation.accepts(context.isolation_key()) {
            return self
                .router
                .reroute(&context)
                .await
                .map_err(|error| failure(&context, None, error.into()));
        }

        let mut info = ExecutionInfo {
            client_type: context.client_type(),
            resource_id: context.resource_id().to_string(),
            message_id: context.message_id().to_string(),
            payload_type_id: context.payload_type_id().map(str::to_string),
            handler: None,
        };
        for listener in &self.listeners {
            listener.on_execution_start(&info);
        }
        let started = Instant::now();

        let Some(payload_type_id) = context.payload_type_id().map(str::to_string) else {
            let error = ReceptionError::MissingPayloadTypeId;
            self.notify_failed(&info, &error);
            return Err(failure(&context, None, error));
        };

        let Some(registration) = self
            .registry
            .get_reception_registration(&payload_type_id, context.resource_id(), context.client_type())
            .cloned()
        else {
            debug!(
                client_type = %context.client_type(),
                resource_id = context.resource_id(),
                message_id = context.message_id(),
                payload_type_id = %payload_type_id,
                "no handler registered, message ignored"
            );
            return Ok(());
        };
        info.handler = Some(registration.handler_type().name());
        let context = context.with_registration(Some(Arc::clone(&registration)));

        self.record_delivery(&context);

        match self.dispatch(&context, &registration).await {
            Ok(Execution::Cancelled) => {
                info!(
                    client_type = %context.client_type(),
                    resource_id = context.resource_id(),
                    message_id = context.message_id(),
                    payload_type_id = %payload_type_id,
                    handler = %registration.handler_type(),
                    "message handling cancelled, left unsettled"
                );
                Ok(())
            }
            Ok(Execution::Completed) => {
                let elapsed = started.elapsed();
                for listener in &self.listeners {
                    listener.on_execution_success(&info, elapsed);
                }
                info!(
                    client_type = %context.client_type(),
                    resource_id = context.resource_id(),
                    message_id = context.message_id(),
                    payload_type_id = %payload_type_id,
                    handler = %registration.handler_type(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "message handled"
                );
                Ok(())
            }
            Err(error) => {
                warn!(
                    client_type = %context.client_type(),
                    resource_id = context.resource_id(),
                    message_id = context.message_id(),
                    payload_type_id = %payload_type_id,
                    handler = %registration.handler_type(),
                    %error,
                    "message handling failed"
                );
                self.notify_failed(&info, &error);
                Err(failure(&context, Some(registration.as_ref()), error))
            }
        }
    }

    /// Run the handler, then send what it published.
    ///
    /// Once cancellation is requested the publications are discarded and
    /// the execution counts as cancelled, not failed.
    async fn dispatch(
        &self,
        context: &MessageContext,
        registration: &MessageReceptionRegistration,
    ) -> Result<Execution, ReceptionError> {
        let handler_context = context.handler_context();
        match registration
            .invoke(&context.message().message.body, handler_context.clone())
            .await
        {
            Ok(()) => {}
            Err(ReceptionError::Handler(HandlerError::Cancelled)) => {
                handler_context.take_publications();
                return Ok(Execution::Cancelled);
            }
            Err(error) => return Err(error),
        }

        let publications = handler_context.take_publications();
        if context.cancellation_token().is_cancelled() {
            debug!(
                message_id = context.message_id(),
                discarded = publications.len(),
                "reception cancelled, publications discarded"
            );
            return Ok(Execution::Cancelled);
        }
        if publications.is_empty() {
            return Ok(Execution::Completed);
        }
        self.dispatch_sender
            .send_dispatches(
                &publications,
                Some(&handler_context.inbound()),
                context.cancellation_token(),
            )
            .await
            .map(|()| Execution::Completed)
            .map_err(ReceptionError::Publish)
    }

    fn record_delivery(&self, context: &MessageContext) {
        let message = context.message();
        let latency = Utc::now()
            .signed_duration_since(message.enqueued_time)
            .num_milliseconds()
            .max(0);
        debug!(
            resource_id = context.resource_id(),
            message_id = context.message_id(),
            queue_latency_ms = latency,
            delivery_count = message.delivery_count,
            "message received"
        );
    }

    fn notify_failed(&self, info: &ExecutionInfo, error: &ReceptionError) {
        for listener in &self.listeners {
            listener.on_execution_failed(info, error);
        }
    }
}

fn failure(
    context: &MessageContext,
    registration: Option<&MessageReceptionRegistration>,
    source: ReceptionError,
) -> FailedToProcessMessage {
    FailedToProcessMessage {
        client_type: context.client_type(),
        resource_id: context.resource_id().to_string(),
        message_id: context.message_id().to_string(),
        payload_type_id: context.payload_type_id().map(str::to_string),
        session_id: context.message().session_id().map(str::to_string),
        handler: registration.map(|registration| registration.handler_type().name()),
        isolation_key: context.isolation_key().map(str::to_string),
        source,
    }
}
