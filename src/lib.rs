//! Service bus middleware: typed dispatch and reception over queues, topics
//! and subscriptions.
//!
//! Application code registers, per payload type, where outgoing payloads are
//! sent and which handler receives incoming ones. The crate takes care of
//! the rest:
//!
//! - **Dispatch**: one message per registered destination, standard
//!   properties stamped, packed into size-bounded batches, sent
//!   concurrently per resource ([`dispatch`]).
//! - **Reception**: each received message is routed by its `PayloadTypeId`
//!   to at most one handler ([`reception`]).
//! - **Isolation**: instances sharing a broker only handle messages carrying
//!   their own isolation key; other messages are handed back to their source.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ServiceBusBuilder (composition)             │
//! │  dispatch::<T>(options) / receive::<T, H>(options, handler) │
//! └─────────────────────────────────────────────────────────────┘
//!                            │ build(client_factory)
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ServiceBus                           │
//! │  Publisher ──► MessageFactory ──► MessageBatcher ──► send   │
//! │  process_message ──► ReceptionPipeline ──► handler          │
//! │                          └──► IsolationRouter               │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   transport: MessageSender / MessageReceiver / ClientFactory│
//! └─────────────────────────────────────────────────────────────┘
//! ```

extern crate self as sourced_servicebus;

mod client;
pub mod dispatch;
mod message;
mod payload;
pub mod reception;
pub mod registry;
mod serializer;
mod service_bus;
mod settings;
pub mod transport;

pub use client::{topic_of, ClientOptions, ClientType, SUBSCRIPTIONS_SEGMENT};
pub use dispatch::{Dispatch, DispatchError, ScheduledDispatch};
pub use message::{
    ApplicationProperties, InboundMessage, ServiceBusMessage, ServiceBusReceivedMessage,
    DIAGNOSTIC_ID_PROPERTY, INTEGRATION_EVENT, ISOLATION_APPS_PROPERTY, ISOLATION_KEY_PROPERTY,
    MESSAGE_TYPE_PROPERTY, PAYLOAD_TYPE_ID_PROPERTY,
};
pub use payload::{Payload, PayloadType};
pub use reception::{
    ExecutionInfo, ExecutionListener, FailedToProcessMessage, HandlerContext, HandlerError,
    MessageHandler, ProcessMessageArgs, ReceptionError,
};
pub use registry::{CompositionError, RegistrationError};
#[cfg(feature = "bitcode")]
pub use serializer::BitcodePayloadSerializer;
pub use serializer::{JsonPayloadSerializer, PayloadSerializer, SerializationError};
pub use service_bus::{Publisher, ServiceBus, ServiceBusBuilder};
pub use settings::{
    ConnectionSettings, IsolationBehavior, IsolationSettings, ServiceBusSettings, TransportType,
    DEFAULT_SCHEDULE_PAGE_SIZE,
};

// Derive macro for `Payload`
pub use sourced_servicebus_macros::Payload;

// Re-exported so handlers can be written without depending on these crates directly
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
