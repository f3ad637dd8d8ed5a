//! Transport resource identity: queues, topics and subscriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::settings::ConnectionSettings;

/// Separator between topic and subscription name in a subscription resource id.
pub const SUBSCRIPTIONS_SEGMENT: &str = "/Subscriptions/";

/// Kind of transport resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClientType {
    Queue,
    Topic,
    Subscription,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientType::Queue => "Queue",
            ClientType::Topic => "Topic",
            ClientType::Subscription => "Subscription",
        };
        f.write_str(name)
    }
}

/// One transport resource as configured by the application.
///
/// `original_resource_id` is the entity path requested by the caller and is
/// what the transport connects to. `resource_id` is the logical id inside
/// this process; it only differs from the original when the same entity is
/// requested on several connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    resource_id: String,
    original_resource_id: String,
    client_type: ClientType,
    connection: Option<ConnectionSettings>,
}

impl ClientOptions {
    pub fn new(client_type: ClientType, resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        Self {
            original_resource_id: resource_id.clone(),
            resource_id,
            client_type,
            connection: None,
        }
    }

    pub fn queue(name: impl Into<String>) -> Self {
        Self::new(ClientType::Queue, name)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::new(ClientType::Topic, name)
    }

    /// Subscription `subscription` on `topic`, with resource id
    /// `"{topic}/Subscriptions/{subscription}"`.
    pub fn subscription(topic: impl AsRef<str>, subscription: impl AsRef<str>) -> Self {
        Self::new(
            ClientType::Subscription,
            format!(
                "{}{}{}",
                topic.as_ref(),
                SUBSCRIPTIONS_SEGMENT,
                subscription.as_ref()
            ),
        )
    }

    /// Use a specific connection instead of the settings default.
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn original_resource_id(&self) -> &str {
        &self.original_resource_id
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn connection(&self) -> Option<&ConnectionSettings> {
        self.connection.as_ref()
    }

    /// Topic a subscription belongs to; `None` for queues and topics.
    pub fn topic_name(&self) -> Option<&str> {
        match self.client_type {
            ClientType::Subscription => Some(topic_of(&self.original_resource_id)),
            _ => None,
        }
    }

    pub(crate) fn with_resource_id(mut self, resource_id: String) -> Self {
        self.resource_id = resource_id;
        self
    }

    pub(crate) fn with_default_connection(mut self, connection: Option<&ConnectionSettings>) -> Self {
        if self.connection.is_none() {
            self.connection = connection.cloned();
        }
        self
    }
}

/// Topic part of a subscription resource id (`"topic/Subscriptions/sub"` → `"topic"`).
/// Ids without the separator are returned unchanged.
pub fn topic_of(subscription_resource_id: &str) -> &str {
    match subscription_resource_id.find(SUBSCRIPTIONS_SEGMENT) {
        Some(index) => &subscription_resource_id[..index],
        None => subscription_resource_id,
    }
}
