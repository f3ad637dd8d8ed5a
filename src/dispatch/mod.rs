//! Outgoing side: dispatches become transport messages and are sent.
//!
//! ```text
//! [Dispatch, ...]
//!       │  MessageFactory      one message per (dispatch × registration)
//!       ▼
//! [OutgoingMessage, ...]
//!       │  group by (ClientType, ResourceId), resolve sender
//!       ▼
//! ┌───────────────┐   ┌───────────────┐
//! │ queue orders  │   │ topic events  │     concurrently
//! │ MessageBatcher│   │ MessageBatcher│
//! │ batch 1 ─► 2  │   │ batch 1       │     in order per resource
//! └───────────────┘   └───────────────┘
//! ```

#[allow(clippy::module_inception)]
mod dispatch;
mod batcher;
mod error;
mod factory;
mod sender;

pub use batcher::MessageBatcher;
pub use dispatch::Dispatch;
pub use error::DispatchError;
pub use factory::{MessageFactory, OutgoingMessage};
pub use sender::{DispatchSender, ScheduledDispatch};
