//! Resolved senders and receivers, keyed by `(ClientType, ResourceId)`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{ClientOptions, ClientType};
use crate::settings::ConnectionSettings;
use crate::transport::{MessageSender, TransportError};

/// A sender together with the resource it was created for.
#[derive(Clone)]
pub struct RegisteredSender {
    pub options: Arc<ClientOptions>,
    pub sender: Arc<dyn MessageSender>,
}

impl fmt::Debug for RegisteredSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredSender")
            .field("options", &self.options)
            .field("entity_path", &self.sender.entity_path())
            .finish()
    }
}

type ResourceKey = (ClientType, String);

/// Process-wide index of transport clients.
///
/// Populated once while the bus is built and read-only afterwards, except
/// for the temporary senders of isolation re-routing, which live in a
/// concurrent map while their single send is in flight.
#[derive(Default)]
pub struct ServiceBusRegistry {
    senders: BTreeMap<ResourceKey, RegisteredSender>,
    receivers: BTreeMap<ResourceKey, Arc<ClientOptions>>,
    temporary_senders: DashMap<Uuid, Arc<dyn MessageSender>>,
}

impl ServiceBusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sender of a queue or topic. Replaces a previous sender
    /// for the same resource.
    pub fn register_sender(&mut self, options: Arc<ClientOptions>, sender: Arc<dyn MessageSender>) {
        let key = (options.client_type(), options.resource_id().to_string());
        self.senders.insert(key, RegisteredSender { options, sender });
    }

    /// Register a queue or subscription this process receives from.
    pub fn register_receiver(&mut self, options: Arc<ClientOptions>) {
        let key = (options.client_type(), options.resource_id().to_string());
        self.receivers.insert(key, options);
    }

    pub fn get_sender(&self, client_type: ClientType, resource_id: &str) -> Option<&RegisteredSender> {
        self.senders.get(&(client_type, resource_id.to_string()))
    }

    /// Sender connected to entity `original_resource_id` on `connection`,
    /// whatever its logical resource id.
    pub fn find_sender(
        &self,
        client_type: ClientType,
        original_resource_id: &str,
        connection: Option<&ConnectionSettings>,
    ) -> Option<&RegisteredSender> {
        self.senders.values().find(|registered| {
            registered.options.client_type() == client_type
                && registered.options.original_resource_id() == original_resource_id
                && registered.options.connection() == connection
        })
    }

    pub fn get_receiver(&self, client_type: ClientType, resource_id: &str) -> Option<&Arc<ClientOptions>> {
        self.receivers.get(&(client_type, resource_id.to_string()))
    }

    pub fn senders(&self) -> impl Iterator<Item = &RegisteredSender> {
        self.senders.values()
    }

    pub fn receivers(&self) -> impl Iterator<Item = &Arc<ClientOptions>> {
        self.receivers.values()
    }

    /// Track a short-lived sender until [`release_temporary_sender`](Self::release_temporary_sender).
    pub fn track_temporary_sender(&self, sender: Arc<dyn MessageSender>) -> Uuid {
        let id = Uuid::new_v4();
        debug!(%id, entity_path = sender.entity_path(), "temporary sender created");
        self.temporary_senders.insert(id, sender);
        id
    }

    /// Stop tracking a temporary sender and close it.
    pub async fn release_temporary_sender(&self, id: Uuid) {
        let Some((_, sender)) = self.temporary_senders.remove(&id) else {
            return;
        };
        if let Err(error) = sender.close().await {
            warn!(%id, entity_path = sender.entity_path(), %error, "failed to close temporary sender");
        } else {
            debug!(%id, entity_path = sender.entity_path(), "temporary sender closed");
        }
    }

    pub fn temporary_sender_count(&self) -> usize {
        self.temporary_senders.len()
    }

    /// Close every registered and temporary sender. Every sender is
    /// attempted; the first error is returned.
    pub async fn close_all(&self) -> Result<(), TransportError> {
        let temporary: Vec<Arc<dyn MessageSender>> = self
            .temporary_senders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.temporary_senders.clear();

        let mut first_error = None;
        let senders = self
            .senders
            .values()
            .map(|registered| &registered.sender)
            .chain(temporary.iter());

        for sender in senders {
            if let Err(error) = sender.close().await {
                warn!(entity_path = sender.entity_path(), %error, "failed to close sender");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ServiceBusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBusRegistry")
            .field("senders", &self.senders.values().collect::<Vec<_>>())
            .field("receivers", &self.receivers.values().collect::<Vec<_>>())
            .field("temporary_senders", &self.temporary_senders.len())
            .finish()
    }
}
