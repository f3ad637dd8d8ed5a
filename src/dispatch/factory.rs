//! Message Factory: dispatches → transport messages, one per destination.

use std::sync::Arc;

use uuid::Uuid;

use super::{Dispatch, DispatchError};
use crate::message::{
    join_isolation_apps, InboundMessage, ServiceBusMessage, DIAGNOSTIC_ID_PROPERTY,
    INTEGRATION_EVENT, ISOLATION_APPS_PROPERTY, ISOLATION_KEY_PROPERTY, MESSAGE_TYPE_PROPERTY,
    PAYLOAD_TYPE_ID_PROPERTY,
};
use crate::registry::{DispatchRegistry, MessageDispatchRegistration};
use crate::settings::IsolationSettings;

/// A built message and the registration it was built for.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub registration: Arc<MessageDispatchRegistration>,
    pub message: ServiceBusMessage,
}

/// Builds transport messages from dispatches. Performs no I/O.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    registry: Arc<DispatchRegistry>,
    isolation: IsolationSettings,
}

impl MessageFactory {
    pub fn new(registry: Arc<DispatchRegistry>, isolation: IsolationSettings) -> Self {
        Self { registry, isolation }
    }

    /// One message per (dispatch × matching registration), in dispatch order
    /// and then registration order.
    ///
    /// `inbound` is the message currently being handled, if any; outgoing
    /// messages inherit its correlation id and isolation identity.
    pub fn create_messages(
        &self,
        dispatches: &[Dispatch],
        inbound: Option<&InboundMessage>,
    ) -> Result<Vec<OutgoingMessage>, DispatchError> {
        let mut messages = Vec::new();

        for dispatch in dispatches {
            let registrations = self
                .registry
                .get_dispatch_registrations(dispatch.payload_type())?;

            for registration in registrations {
                messages.push(OutgoingMessage {
                    registration: Arc::clone(registration),
                    message: self.create_message(dispatch, registration, inbound)?,
                });
            }
        }

        Ok(messages)
    }

    fn create_message(
        &self,
        dispatch: &Dispatch,
        registration: &MessageDispatchRegistration,
        inbound: Option<&InboundMessage>,
    ) -> Result<ServiceBusMessage, DispatchError> {
        let payload_type_id = registration.payload_type_id();
        let body = registration
            .encode(dispatch.payload_any())
            .map_err(|source| DispatchError::Serialization {
                payload_type_id: payload_type_id.to_string(),
                source,
            })?;

        let mut message = ServiceBusMessage::new(
            dispatch
                .message_id()
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
            body,
        );
        message.content_type = Some(registration.content_type().to_string());
        message.subject = Some(format!("An integration event of type '{}'", payload_type_id));
        message.session_id = dispatch.session_id().map(str::to_string);
        message.correlation_id = Some(
            dispatch
                .correlation_id()
                .or_else(|| inbound.and_then(|inbound| inbound.correlation_id.as_deref()))
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        );

        // Caller properties first so the routing properties always win.
        message.application_properties = dispatch.application_properties().clone();
        let properties = &mut message.application_properties;
        properties.insert(MESSAGE_TYPE_PROPERTY.to_string(), INTEGRATION_EVENT.into());
        properties.insert(PAYLOAD_TYPE_ID_PROPERTY.to_string(), payload_type_id.into());

        let isolation_key = inbound
            .and_then(|inbound| inbound.isolation_key.as_deref())
            .or(self.isolation.isolation_key.as_deref());
        if let Some(key) = isolation_key {
            properties.insert(ISOLATION_KEY_PROPERTY.to_string(), key.into());
        }

        let isolation_apps: &[String] = match (inbound, &self.isolation.application_name) {
            (Some(inbound), _) if !inbound.isolation_apps.is_empty() => &inbound.isolation_apps,
            (_, Some(name)) if self.isolation.isolation_apps.is_empty() => {
                std::slice::from_ref(name)
            }
            _ => &self.isolation.isolation_apps,
        };
        if !isolation_apps.is_empty() {
            properties.insert(
                ISOLATION_APPS_PROPERTY.to_string(),
                join_isolation_apps(isolation_apps).into(),
            );
        }

        if let Some(diagnostic_id) = dispatch.diagnostic_id() {
            properties.insert(DIAGNOSTIC_ID_PROPERTY.to_string(), diagnostic_id.into());
        }

        registration.customize(&mut message, dispatch.payload_any());
        Ok(message)
    }
}
