//! Incoming registrations: (resource, payload type id) → one handler.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::error::RegistrationError;
use crate::client::{ClientOptions, ClientType};
use crate::payload::{simple_name, Payload, PayloadType};
use crate::reception::handler::{ReceptionInvoker, TypedInvoker};
use crate::reception::{HandlerContext, MessageHandler, ReceptionError};
use crate::serializer::PayloadSerializer;

/// Runtime identity of a handler type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    pub fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: type_name::<H>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(simple_name(self.name))
    }
}

/// Binds a handler to the messages of one payload type on one resource.
pub struct MessageReceptionRegistration {
    options: Arc<ClientOptions>,
    payload_type: PayloadType,
    handler_type: HandlerType,
    payload_type_id: String,
    invoker: Arc<dyn ReceptionInvoker>,
}

impl MessageReceptionRegistration {
    /// Handle `T` received on `options` with `handler`, decoding bodies with
    /// `serializer`.
    pub fn new<T, H, S>(options: Arc<ClientOptions>, handler: Arc<H>, serializer: Arc<S>) -> Self
    where
        T: Payload,
        H: MessageHandler<T>,
        S: PayloadSerializer,
    {
        Self {
            options,
            payload_type: PayloadType::of::<T>(),
            handler_type: HandlerType::of::<H>(),
            payload_type_id: T::TYPE_ID.to_string(),
            invoker: Arc::new(TypedInvoker::<T, H, S>::new(handler, serializer)),
        }
    }

    /// Match a different wire-level type id than `T::TYPE_ID`.
    pub fn with_payload_type_id(mut self, payload_type_id: impl Into<String>) -> Self {
        self.payload_type_id = payload_type_id.into();
        self
    }

    pub fn options(&self) -> &Arc<ClientOptions> {
        &self.options
    }

    pub fn client_type(&self) -> ClientType {
        self.options.client_type()
    }

    pub fn resource_id(&self) -> &str {
        self.options.resource_id()
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    pub fn payload_type_id(&self) -> &str {
        &self.payload_type_id
    }

    /// Decode `body` and run the handler.
    pub(crate) async fn invoke(&self, body: &[u8], context: HandlerContext) -> Result<(), ReceptionError> {
        self.invoker
            .invoke(&self.payload_type_id, body, context)
            .await
    }
}

impl fmt::Debug for MessageReceptionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReceptionRegistration")
            .field("client_type", &self.client_type())
            .field("resource_id", &self.resource_id())
            .field("payload_type", &self.payload_type)
            .field("payload_type_id", &self.payload_type_id)
            .field("handler_type", &self.handler_type)
            .finish()
    }
}

/// Index of reception registrations by `"{clientType}|{resourceId}|{payloadTypeId}"`.
#[derive(Debug, Default)]
pub struct ReceptionRegistry {
    by_key: HashMap<String, Arc<MessageReceptionRegistration>>,
    handlers: HashSet<(ClientType, String, HandlerType)>,
    registrations: Vec<Arc<MessageReceptionRegistration>>,
}

impl ReceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration.
    ///
    /// The same handler may not be registered twice on one resource, and two
    /// registrations on one resource may not claim the same payload type id.
    pub fn register(&mut self, registration: MessageReceptionRegistration) -> Result<(), RegistrationError> {
        if registration.payload_type_id.trim().is_empty() {
            return Err(RegistrationError::EmptyPayloadTypeId {
                payload_type: registration.payload_type.name(),
            });
        }

        let handler_key = (
            registration.client_type(),
            registration.resource_id().to_string(),
            registration.handler_type,
        );
        if self.handlers.contains(&handler_key) {
            return Err(RegistrationError::DuplicateReceptionHandler {
                client_type: registration.client_type(),
                resource_id: registration.resource_id().to_string(),
                handler: registration.handler_type.name(),
            });
        }

        let key = lookup_key(
            registration.client_type(),
            registration.resource_id(),
            &registration.payload_type_id,
        );
        if let Some(existing) = self.by_key.get(&key) {
            return Err(RegistrationError::DuplicatePayloadTypeId {
                client_type: registration.client_type(),
                resource_id: registration.resource_id().to_string(),
                payload_type_id: registration.payload_type_id.clone(),
                existing_handler: existing.handler_type.name(),
                handler: registration.handler_type.name(),
            });
        }

        let registration = Arc::new(registration);
        self.handlers.insert(handler_key);
        self.by_key.insert(key, Arc::clone(&registration));
        self.registrations.push(registration);
        Ok(())
    }

    /// The registration for a received message, `None` if nobody handles it.
    pub fn get_reception_registration(
        &self,
        payload_type_id: &str,
        resource_id: &str,
        client_type: ClientType,
    ) -> Option<&Arc<MessageReceptionRegistration>> {
        self.by_key
            .get(&lookup_key(client_type, resource_id, payload_type_id))
    }

    /// All registrations, in registration order.
    pub fn registrations(&self) -> &[Arc<MessageReceptionRegistration>] {
        &self.registrations
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

fn lookup_key(client_type: ClientType, resource_id: &str, payload_type_id: &str) -> String {
    format!("{}|{}|{}", client_type, resource_id, payload_type_id)
}
