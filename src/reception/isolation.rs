//! Isolation Router: hand a message that belongs to another instance back
//! to its source.
//!
//! ```text
//!   queue orders ──► [key: dev-bob] ──► this instance (key: dev-alice)
//!                                           │ 1. complete
//!                                           │ 2. copy
//!   queue orders ◄──────────────────────────┘ 3. resend
//!
//!   events/Subscriptions/billing ──► ... ──► resend to topic events
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use super::{MessageContext, RerouteError};
use crate::client::{topic_of, ClientOptions, ClientType};
use crate::message::ServiceBusMessage;
use crate::registry::ServiceBusRegistry;
use crate::settings::ConnectionSettings;
use crate::transport::{ClientFactory, TransportError};

/// Completes mismatched messages and resends a copy to where they came from.
pub struct IsolationRouter {
    registry: Arc<ServiceBusRegistry>,
    client_factory: Arc<dyn ClientFactory>,
    default_connection: Option<ConnectionSettings>,
}

impl IsolationRouter {
    pub fn new(
        registry: Arc<ServiceBusRegistry>,
        client_factory: Arc<dyn ClientFactory>,
        default_connection: Option<ConnectionSettings>,
    ) -> Self {
        Self {
            registry,
            client_factory,
            default_connection,
        }
    }

    /// Complete the received message, then resend an identical copy to the
    /// originating queue or topic.
    ///
    /// Both steps are always attempted. The message is never handled here.
    pub async fn reroute(&self, context: &MessageContext) -> Result<(), RerouteError> {
        let source = self.source_options(context.client_type(), context.resource_id());
        let target = reroute_target(&source);
        let copy = context.message().to_resend();

        let complete = context.receiver().complete_message(context.message()).await;
        let resend = self.resend(&target, copy).await;

        info!(
            client_type = %context.client_type(),
            resource_id = context.resource_id(),
            message_id = context.message_id(),
            isolation_key = context.isolation_key().unwrap_or_default(),
            target_type = %target.client_type(),
            target = target.original_resource_id(),
            completed = complete.is_ok(),
            resent = resend.is_ok(),
            "message rerouted to its isolation owner"
        );

        RerouteError::from_results(complete, resend)
    }

    /// Registered options of the receiving resource, so the copy goes out on
    /// the connection it came in on.
    fn source_options(&self, client_type: ClientType, resource_id: &str) -> ClientOptions {
        match self.registry.get_receiver(client_type, resource_id) {
            Some(options) => options.as_ref().clone(),
            None => ClientOptions::new(client_type, resource_id)
                .with_default_connection(self.default_connection.as_ref()),
        }
    }

    async fn resend(
        &self,
        target: &ClientOptions,
        message: ServiceBusMessage,
    ) -> Result<(), TransportError> {
        if let Some(registered) = self.registry.find_sender(
            target.client_type(),
            target.original_resource_id(),
            target.connection(),
        ) {
            debug!(
                resource_id = registered.options.resource_id(),
                "rerouting through registered sender"
            );
            return registered.sender.send_messages(vec![message]).await;
        }

        let sender = self.client_factory.create_sender(target).await?;
        let id = self.registry.track_temporary_sender(Arc::clone(&sender));
        let result = sender.send_messages(vec![message]).await;
        self.registry.release_temporary_sender(id).await;
        result
    }
}

/// Where a message received on `source` must be resent: the same queue, or
/// the parent topic of a subscription.
pub fn reroute_target(source: &ClientOptions) -> ClientOptions {
    let target = match source.client_type() {
        ClientType::Subscription => ClientOptions::topic(topic_of(source.original_resource_id())),
        client_type => ClientOptions::new(client_type, source.original_resource_id()),
    };
    match source.connection() {
        Some(connection) => target.with_connection(connection.clone()),
        None => target,
    }
}
