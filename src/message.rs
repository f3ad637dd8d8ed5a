//! Transport messages and the wire-level properties stamped on them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Application property naming the kind of message. Always [`INTEGRATION_EVENT`].
pub const MESSAGE_TYPE_PROPERTY: &str = "MessageType";
/// Application property carrying the routing type id.
pub const PAYLOAD_TYPE_ID_PROPERTY: &str = "PayloadTypeId";
/// Application property carrying the isolation key.
pub const ISOLATION_KEY_PROPERTY: &str = "IsolationKey";
/// Application property carrying the comma-joined isolation apps.
pub const ISOLATION_APPS_PROPERTY: &str = "IsolationApps";
/// Application property carrying a caller supplied diagnostic id.
pub const DIAGNOSTIC_ID_PROPERTY: &str = "Diagnostic-Id";

/// Value of [`MESSAGE_TYPE_PROPERTY`].
pub const INTEGRATION_EVENT: &str = "IntegrationEvent";

/// Open bag of application properties.
pub type ApplicationProperties = BTreeMap<String, Value>;

/// A message as handed to the transport for sending.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceBusMessage {
    pub message_id: String,
    /// Serialized payload
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// Human readable label
    pub subject: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub application_properties: ApplicationProperties,
}

impl ServiceBusMessage {
    pub fn new(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            body,
            ..Default::default()
        }
    }

    /// Set an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// String value of an application property, if present and a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.application_properties.get(key).and_then(Value::as_str)
    }

    pub fn payload_type_id(&self) -> Option<&str> {
        self.property_str(PAYLOAD_TYPE_ID_PROPERTY)
    }

    pub fn isolation_key(&self) -> Option<&str> {
        self.property_str(ISOLATION_KEY_PROPERTY)
    }

    /// Isolation apps split back out of the comma-joined property.
    pub fn isolation_apps(&self) -> Vec<String> {
        self.property_str(ISOLATION_APPS_PROPERTY)
            .map(split_isolation_apps)
            .unwrap_or_default()
    }

    /// Estimated encoded size: body, identifiers and properties.
    pub fn size_in_bytes(&self) -> usize {
        let optional = |value: &Option<String>| value.as_ref().map_or(0, String::len);
        let properties: usize = self
            .application_properties
            .iter()
            .map(|(key, value)| key.len() + value_size(value))
            .sum();

        self.body.len()
            + self.message_id.len()
            + optional(&self.content_type)
            + optional(&self.subject)
            + optional(&self.correlation_id)
            + optional(&self.session_id)
            + properties
    }

    /// Body as UTF-8, if valid.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A message delivered by a receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceBusReceivedMessage {
    pub message: ServiceBusMessage,
    pub sequence_number: i64,
    /// Number of deliveries including this one
    pub delivery_count: u32,
    pub enqueued_time: DateTime<Utc>,
    /// Token the receiver uses to settle the message
    pub lock_token: String,
}

impl ServiceBusReceivedMessage {
    pub fn new(message: ServiceBusMessage) -> Self {
        Self {
            message,
            sequence_number: 0,
            delivery_count: 1,
            enqueued_time: Utc::now(),
            lock_token: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.message.correlation_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.message.session_id.as_deref()
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

    /// Content-identical copy of this message for sending again.
    pub fn to_resend(&self) -> ServiceBusMessage {
        self.message.clone()
    }
}

/// The inbound message currently being handled, as seen by outgoing dispatch.
///
/// Outgoing messages inherit its correlation id and isolation identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub isolation_key: Option<String>,
    pub isolation_apps: Vec<String>,
}

impl InboundMessage {
    pub fn from_received(message: &ServiceBusReceivedMessage) -> Self {
        Self {
            message_id: message.message_id().to_string(),
            correlation_id: message.correlation_id().map(str::to_string),
            isolation_key: message.isolation_key().map(str::to_string),
            isolation_apps: message.isolation_apps(),
        }
    }
}

pub(crate) fn join_isolation_apps(apps: &[String]) -> String {
    apps.join(",")
}

pub(crate) fn split_isolation_apps(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|app| !app.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}
