//! Registration Registry: who sends what where, and who handles what.
//!
//! Registrations are declared once while composing the bus and are
//! validated eagerly: duplicate dispatch destinations, a handler subscribed
//! twice to one resource, or two handlers claiming the same wire type id on
//! one resource all abort composition instead of being silently overwritten.
//!
//! ```text
//! PayloadType ──► [MessageDispatchRegistration, ...]          (fan-out)
//! "{clientType}|{resourceId}|{payloadTypeId}" ──► MessageReceptionRegistration
//! (ClientType, ResourceId) ──► sender / receiver              (ServiceBusRegistry)
//! ```

mod dispatch;
mod error;
mod reception;
mod resources;
mod service_bus_registry;

pub use dispatch::{DispatchRegistrationBuilder, DispatchRegistry, MessageDispatchRegistration};
pub use error::{CompositionError, DuplicateDispatchRegistration, RegistrationError};
pub use reception::{HandlerType, MessageReceptionRegistration, ReceptionRegistry};
pub use resources::ResourceAllocator;
pub use service_bus_registry::{RegisteredSender, ServiceBusRegistry};
