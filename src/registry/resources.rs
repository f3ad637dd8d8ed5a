//! Resource id allocation.
//!
//! The same entity name may be requested on several connections (say the
//! `orders` queue in two namespaces). Each distinct connection gets its own
//! logical resource id so the `(ClientType, ResourceId)` index stays unique:
//! the first keeps `orders`, the next ones get `orders_2`, `orders_3`, ...

use std::sync::Arc;

use tracing::debug;

use crate::client::{ClientOptions, ClientType};
use crate::settings::ConnectionSettings;

/// Hands out unique resource ids, stable for a given registration order.
#[derive(Debug, Default)]
pub struct ResourceAllocator {
    default_connection: Option<ConnectionSettings>,
    allocated: Vec<Arc<ClientOptions>>,
}

impl ResourceAllocator {
    /// Resources without an explicit connection inherit `default_connection`.
    pub fn new(default_connection: Option<ConnectionSettings>) -> Self {
        Self {
            default_connection,
            allocated: Vec::new(),
        }
    }

    /// Resolve requested options to allocated ones.
    ///
    /// The same entity on the same connection always yields the same
    /// allocation; a different connection yields a suffixed resource id.
    pub fn allocate(&mut self, requested: ClientOptions) -> Arc<ClientOptions> {
        let requested = requested.with_default_connection(self.default_connection.as_ref());

        if let Some(existing) = self.allocated.iter().find(|allocated| {
            allocated.client_type() == requested.client_type()
                && allocated.original_resource_id() == requested.original_resource_id()
                && allocated.connection() == requested.connection()
        }) {
            return Arc::clone(existing);
        }

        let resource_id =
            self.free_resource_id(requested.client_type(), requested.original_resource_id());
        if resource_id != requested.original_resource_id() {
            debug!(
                client_type = %requested.client_type(),
                original_resource_id = requested.original_resource_id(),
                resource_id = %resource_id,
                "resource requested on another connection, allocated a distinct id"
            );
        }

        let options = Arc::new(requested.with_resource_id(resource_id));
        self.allocated.push(Arc::clone(&options));
        options
    }

    /// Every allocation so far, in allocation order.
    pub fn allocated(&self) -> &[Arc<ClientOptions>] {
        &self.allocated
    }

    fn is_taken(&self, client_type: ClientType, resource_id: &str) -> bool {
        self.allocated
            .iter()
            .any(|options| options.client_type() == client_type && options.resource_id() == resource_id)
    }

    fn free_resource_id(&self, client_type: ClientType, original: &str) -> String {
        if !self.is_taken(client_type, original) {
            return original.to_string();
        }

        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", original, suffix);
            if !self.is_taken(client_type, &candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}
