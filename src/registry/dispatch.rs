//! Outgoing registrations: payload type → destination(s).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::error::{DuplicateDispatchRegistration, RegistrationError};
use crate::client::{ClientOptions, ClientType};
use crate::dispatch::DispatchError;
use crate::message::ServiceBusMessage;
use crate::payload::{Payload, PayloadType};
use crate::serializer::{PayloadSerializer, SerializationError};

type PayloadEncoder =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, SerializationError> + Send + Sync>;
type OutgoingCustomizer = Arc<dyn Fn(&mut ServiceBusMessage, &(dyn Any + Send + Sync)) + Send + Sync>;

/// Binds a payload type to one destination resource.
///
/// Identity is `(payload type, client type, resource id)`.
pub struct MessageDispatchRegistration {
    options: Arc<ClientOptions>,
    payload_type: PayloadType,
    payload_type_id: String,
    content_type: String,
    encoder: PayloadEncoder,
    customizers: Vec<OutgoingCustomizer>,
}

impl MessageDispatchRegistration {
    /// Register `T` to be sent to `options`, encoded with `serializer`.
    pub fn new<T, S>(options: Arc<ClientOptions>, serializer: Arc<S>) -> Self
    where
        T: Payload,
        S: PayloadSerializer,
    {
        let content_type = serializer.content_type().to_string();
        let encoder: PayloadEncoder = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            let payload = payload
                .downcast_ref::<T>()
                .ok_or(SerializationError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            serializer.serialize(payload)
        });

        Self {
            options,
            payload_type: PayloadType::of::<T>(),
            payload_type_id: T::TYPE_ID.to_string(),
            content_type,
            encoder,
            customizers: Vec::new(),
        }
    }

    /// Override the wire-level type id.
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

    pub fn payload_type_id(&self) -> &str {
        &self.payload_type_id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn customizer_count(&self) -> usize {
        self.customizers.len()
    }

    pub(crate) fn encode(
        &self,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, SerializationError> {
        (self.encoder)(payload)
    }

    /// Run every customizer, in registration order.
    pub(crate) fn customize(&self, message: &mut ServiceBusMessage, payload: &(dyn Any + Send + Sync)) {
        for customizer in &self.customizers {
            customizer(message, payload);
        }
    }

    fn key(&self) -> (PayloadType, ClientType, &str) {
        (self.payload_type, self.client_type(), self.resource_id())
    }
}

impl fmt::Debug for MessageDispatchRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDispatchRegistration")
            .field("payload_type", &self.payload_type)
            .field("client_type", &self.client_type())
            .field("resource_id", &self.resource_id())
            .field("payload_type_id", &self.payload_type_id)
            .field("customizers", &self.customizers.len())
            .finish()
    }
}

/// Typed builder for a [`MessageDispatchRegistration`], so customizers see `&T`.
pub struct DispatchRegistrationBuilder<T> {
    registration: MessageDispatchRegistration,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Payload> DispatchRegistrationBuilder<T> {
    pub fn new<S: PayloadSerializer>(options: Arc<ClientOptions>, serializer: Arc<S>) -> Self {
        Self {
            registration: MessageDispatchRegistration::new::<T, S>(options, serializer),
            _payload: PhantomData,
        }
    }

    /// Override the wire-level type id (defaults to `T::TYPE_ID`).
    pub fn payload_type_id(mut self, payload_type_id: impl Into<String>) -> Self {
        self.registration = self.registration.with_payload_type_id(payload_type_id);
        self
    }

    /// Mutate every outgoing message of this registration after it is built.
    pub fn customize_outgoing_message<F>(mut self, customizer: F) -> Self
    where
        F: Fn(&mut ServiceBusMessage, &T) + Send + Sync + 'static,
    {
        self.registration
            .customizers
            .push(Arc::new(move |message: &mut ServiceBusMessage, payload: &(dyn Any + Send + Sync)| {
                if let Some(payload) = payload.downcast_ref::<T>() {
                    customizer(message, payload);
                }
            }));
        self
    }

    pub fn build(self) -> MessageDispatchRegistration {
        self.registration
    }
}

/// Index of dispatch registrations by payload type.
#[derive(Debug, Default)]
pub struct DispatchRegistry {
    by_payload_type: HashMap<PayloadType, Vec<Arc<MessageDispatchRegistration>>>,
    count: usize,
}

impl DispatchRegistry {
    /// Build the registry, rejecting every duplicate group at once.
    pub fn new(
        registrations: impl IntoIterator<Item = MessageDispatchRegistration>,
    ) -> Result<Self, RegistrationError> {
        let mut registry = Self::default();
        registry.register(registrations.into_iter().collect())?;
        Ok(registry)
    }

    /// Add registrations. On error nothing is added.
    ///
    /// Duplicates are searched across the existing and the new registrations
    /// together, and every offending group is reported.
    pub fn register(
        &mut self,
        registrations: Vec<MessageDispatchRegistration>,
    ) -> Result<(), RegistrationError> {
        for registration in &registrations {
            if registration.payload_type_id.trim().is_empty() {
                return Err(RegistrationError::EmptyPayloadTypeId {
                    payload_type: registration.payload_type.name(),
                });
            }
            if registration.client_type() == ClientType::Subscription {
                return Err(RegistrationError::InvalidDispatchTarget {
                    resource_id: registration.resource_id().to_string(),
                });
            }
        }

        let duplicates = {
            let all = self
                .by_payload_type
                .values()
                .flatten()
                .map(AsRef::as_ref)
                .chain(registrations.iter());
            find_duplicates(all)
        };
        if !duplicates.is_empty() {
            return Err(RegistrationError::MultiplePublicationRegistration { duplicates });
        }

        for registration in registrations {
            self.count += 1;
            self.by_payload_type
                .entry(registration.payload_type)
                .or_default()
                .push(Arc::new(registration));
        }
        Ok(())
    }

    /// Every registration for `payload_type`. Unknown types are an error:
    /// a dispatch must never be dropped silently.
    pub fn get_dispatch_registrations(
        &self,
        payload_type: PayloadType,
    ) -> Result<&[Arc<MessageDispatchRegistration>], DispatchError> {
        self.by_payload_type
            .get(&payload_type)
            .map(Vec::as_slice)
            .ok_or(DispatchError::DispatchRegistrationNotFound {
                payload_type: payload_type.name(),
            })
    }

    /// All registrations, grouped by payload type.
    pub fn registrations(&self) -> impl Iterator<Item = &Arc<MessageDispatchRegistration>> {
        self.by_payload_type.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn find_duplicates<'a>(
    registrations: impl Iterator<Item = &'a MessageDispatchRegistration>,
) -> Vec<DuplicateDispatchRegistration> {
    let mut order = Vec::new();
    let mut groups: HashMap<_, Vec<&MessageDispatchRegistration>> = HashMap::new();

    for registration in registrations {
        let group = groups.entry(registration.key()).or_insert_with(|| {
            order.push(registration.key());
            Vec::new()
        });
        group.push(registration);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let group = groups.get(&key)?;
            if group.len() < 2 {
                return None;
            }
            let (payload_type, client_type, resource_id) = key;
            Some(DuplicateDispatchRegistration {
                payload_type: payload_type.name(),
                client_type,
                resource_id: resource_id.to_string(),
                payload_type_ids: group.iter().map(|r| r.payload_type_id.clone()).collect(),
            })
        })
        .collect()
}
