//! Service bus configuration.
//!
//! Settings are plain serde structs so they can be loaded from whatever
//! configuration source the host uses, then adjusted with the `with_*`
//! builder methods.
//!
//! ```
//! use sourced_servicebus::{IsolationBehavior, ServiceBusSettings};
//!
//! let settings: ServiceBusSettings = serde_json::from_str(r#"{
//!     "isolation": { "behavior": "HandleIsolatedMessages", "isolation_key": "dev-alice" }
//! }"#).unwrap();
//!
//! assert_eq!(settings.isolation.behavior, IsolationBehavior::HandleIsolatedMessages);
//! assert_eq!(settings.schedule_page_size, 100);
//! ```

use serde::{Deserialize, Serialize};

/// Default number of messages per `schedule_messages` call.
pub const DEFAULT_SCHEDULE_PAGE_SIZE: usize = 100;

/// Top-level settings for a service bus instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBusSettings {
    /// Connection used by every resource that does not declare its own.
    pub connection: Option<ConnectionSettings>,
    /// Isolation behaviour of this instance.
    pub isolation: IsolationSettings,
    /// Upper bound requested when creating send batches. `None` lets the
    /// transport apply its own maximum.
    pub max_batch_size_in_bytes: Option<u64>,
    /// Page size for scheduled sends, which have no size-aware batch API.
    pub schedule_page_size: usize,
}

impl Default for ServiceBusSettings {
    fn default() -> Self {
        Self {
            connection: None,
            isolation: IsolationSettings::default(),
            max_batch_size_in_bytes: None,
            schedule_page_size: DEFAULT_SCHEDULE_PAGE_SIZE,
        }
    }
}

impl ServiceBusSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default connection.
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set the isolation settings.
    pub fn with_isolation(mut self, isolation: IsolationSettings) -> Self {
        self.isolation = isolation;
        self
    }

    /// Cap the size of send batches.
    pub fn with_max_batch_size(mut self, bytes: u64) -> Self {
        self.max_batch_size_in_bytes = Some(bytes);
        self
    }

    /// Set the scheduling page size. Zero is clamped to one.
    pub fn with_schedule_page_size(mut self, size: usize) -> Self {
        self.schedule_page_size = size.max(1);
        self
    }
}

/// Transport protocol used by a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    #[default]
    Amqp,
    AmqpWebSockets,
}

/// Identity of a broker connection.
///
/// Two resources whose settings compare equal share a connection; the same
/// resource name requested on two different connections is disambiguated by
/// the resource allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connection_string: Option<String>,
    pub fully_qualified_namespace: Option<String>,
    pub transport_type: TransportType,
}

impl ConnectionSettings {
    /// Connection identified by a connection string.
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    /// Connection identified by a namespace (credential supplied by the transport).
    pub fn from_namespace(namespace: impl Into<String>) -> Self {
        Self {
            fully_qualified_namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_transport_type(mut self, transport_type: TransportType) -> Self {
        self.transport_type = transport_type;
        self
    }
}

/// Which received messages this instance handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationBehavior {
    /// Handle every message regardless of its isolation key.
    #[default]
    HandleAllMessages,
    /// Handle only messages whose isolation key equals the local key;
    /// re-route the others back to their source.
    HandleIsolatedMessages,
}

/// Isolation identity of this instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSettings {
    pub behavior: IsolationBehavior,
    /// Key stamped on outgoing messages and compared on reception.
    pub isolation_key: Option<String>,
    /// Name of the application this instance runs. Stamped as the only
    /// isolation app when `isolation_apps` is empty.
    pub application_name: Option<String>,
    /// Applications the stamped messages are visible to.
    pub isolation_apps: Vec<String>,
}

impl IsolationSettings {
    /// Isolated instance with the given key.
    pub fn isolated(isolation_key: impl Into<String>) -> Self {
        Self {
            behavior: IsolationBehavior::HandleIsolatedMessages,
            isolation_key: Some(isolation_key.into()),
            ..Default::default()
        }
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    pub fn with_isolation_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.isolation_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a message carrying `message_key` is processed locally.
    pub fn accepts(&self, message_key: Option<&str>) -> bool {
        match self.behavior {
            IsolationBehavior::HandleAllMessages => true,
            IsolationBehavior::HandleIsolatedMessages => {
                message_key == self.isolation_key.as_deref()
            }
        }
    }
}
