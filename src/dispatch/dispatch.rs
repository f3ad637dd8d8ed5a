use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::message::ApplicationProperties;
use crate::payload::{Payload, PayloadType};

/// One logical outgoing event: a payload plus the metadata stamped on every
/// message produced from it.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sourced_servicebus::{Dispatch, Payload};
///
/// #[derive(Serialize, Deserialize, Payload)]
/// struct OrderPlaced {
///     id: String,
/// }
///
/// let dispatch = Dispatch::new(OrderPlaced { id: "o-1".into() })
///     .with_session_id("customer-42")
///     .with_property("Tenant", "acme");
///
/// assert_eq!(dispatch.session_id(), Some("customer-42"));
/// assert!(dispatch.payload::<OrderPlaced>().is_some());
/// ```
#[derive(Clone)]
pub struct Dispatch {
    payload: Arc<dyn Any + Send + Sync>,
    payload_type: PayloadType,
    session_id: Option<String>,
    correlation_id: Option<String>,
    message_id: Option<String>,
    diagnostic_id: Option<String>,
    application_properties: ApplicationProperties,
}

impl Dispatch {
    pub fn new<T: Payload>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
            payload_type: PayloadType::of::<T>(),
            session_id: None,
            correlation_id: None,
            message_id: None,
            diagnostic_id: None,
            application_properties: ApplicationProperties::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Overrides the correlation id inherited from the message being handled.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_diagnostic_id(mut self, diagnostic_id: impl Into<String>) -> Self {
        self.diagnostic_id = Some(diagnostic_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// The payload, if it is a `T`.
    pub fn payload<T: Payload>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn diagnostic_id(&self) -> Option<&str> {
        self.diagnostic_id.as_deref()
    }

    pub fn application_properties(&self) -> &ApplicationProperties {
        &self.application_properties
    }

    pub(crate) fn payload_any(&self) -> &(dyn Any + Send + Sync) {
        self.payload.as_ref()
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("payload_type", &self.payload_type)
            .field("session_id", &self.session_id)
            .field("correlation_id", &self.correlation_id)
            .field("message_id", &self.message_id)
            .field("diagnostic_id", &self.diagnostic_id)
            .field("application_properties", &self.application_properties)
            .finish()
    }
}
