//! Transport seams: what the core consumes from a broker client.
//!
//! The core never constructs broker connections itself. It talks to the
//! transport through four narrow traits:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  ServiceBus (composition)                    │
//! │   DispatchSender ──► MessageSender / MessageBatch            │
//! │   ReceptionPipeline ──► MessageReceiver                      │
//! │   IsolationRouter ──► ClientFactory (temporary senders)      │
//! └──────────────────────────────────────────────────────────────┘
//!          │                          │
//!          ▼                          ▼
//! ┌──────────────────┐      ┌──────────────────────────┐
//! │ InMemoryTransport│      │ broker SDK adapter       │
//! │   (included)     │      │     (external)           │
//! └──────────────────┘      └──────────────────────────┘
//! ```

mod error;
mod factory;
#[cfg(feature = "in-memory")]
mod in_memory;
mod receiver;
mod sender;

pub use error::TransportError;
pub use factory::ClientFactory;
#[cfg(feature = "in-memory")]
pub use in_memory::{
    InMemoryBatch, InMemoryReceiver, InMemorySender, InMemoryTransport, TransportOperation,
    DEFAULT_MAX_BATCH_SIZE,
};
pub use receiver::MessageReceiver;
pub use sender::{CreateBatchOptions, MessageBatch, MessageSender};
