//! Composition-time errors.

use std::fmt;

use crate::client::ClientType;
use crate::transport::TransportError;

/// One `(payload type, client type, resource id)` group declared more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateDispatchRegistration {
    pub payload_type: &'static str,
    pub client_type: ClientType,
    pub resource_id: String,
    /// Payload type id of every offending registration, in declaration order.
    pub payload_type_ids: Vec<String>,
}

impl fmt::Display for DuplicateDispatchRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} '{}' ({} registrations: {})",
            self.payload_type,
            self.client_type,
            self.resource_id,
            self.payload_type_ids.len(),
            self.payload_type_ids.join(", ")
        )
    }
}

/// Invalid registration detected while composing the bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The same payload type is sent to the same resource more than once.
    #[error("multiple dispatch registrations for the same destination: {}", join(.duplicates))]
    MultiplePublicationRegistration {
        duplicates: Vec<DuplicateDispatchRegistration>,
    },

    /// A handler subscribed twice to the same resource.
    #[error("handler {handler} is registered more than once on {client_type} '{resource_id}'")]
    DuplicateReceptionHandler {
        client_type: ClientType,
        resource_id: String,
        handler: &'static str,
    },

    /// Two registrations on one resource claim the same wire type id.
    #[error(
        "payload type id '{payload_type_id}' on {client_type} '{resource_id}' is claimed by \
         both {existing_handler} and {handler}"
    )]
    DuplicatePayloadTypeId {
        client_type: ClientType,
        resource_id: String,
        payload_type_id: String,
        existing_handler: &'static str,
        handler: &'static str,
    },

    /// A payload type id was customized to an empty string.
    #[error("payload type id of {payload_type} must not be empty")]
    EmptyPayloadTypeId { payload_type: &'static str },

    /// Subscriptions can be received from, not sent to.
    #[error("cannot dispatch to subscription '{resource_id}'")]
    InvalidDispatchTarget { resource_id: String },

    /// Topics are sent to; their messages are received through subscriptions.
    #[error("cannot receive from topic '{resource_id}', register a subscription instead")]
    InvalidReceptionSource { resource_id: String },
}

/// Failure while building a service bus.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The transport could not create a sender for a dispatch resource.
    #[error("failed to create sender for {client_type} '{resource_id}': {source}")]
    SenderCreation {
        client_type: ClientType,
        resource_id: String,
        #[source]
        source: TransportError,
    },
}

fn join(duplicates: &[DuplicateDispatchRegistration]) -> String {
    duplicates
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
