//! Incoming side: received messages are routed to at most one handler.
//!
//! The transport owns the receive loop and calls
//! [`ReceptionPipeline::process`] once per received message. The pipeline
//! either re-routes the message to the instance it belongs to
//! ([`IsolationRouter`]), ignores it because nobody here handles its type, or
//! deserializes it and awaits the registered [`MessageHandler`].

mod context;
mod error;
pub(crate) mod handler;
mod isolation;
mod listener;
mod pipeline;

pub use context::{HandlerContext, MessageContext};
pub use error::{FailedToProcessMessage, HandlerError, ReceptionError, RerouteError};
pub use handler::MessageHandler;
pub use isolation::{reroute_target, IsolationRouter};
pub use listener::{ExecutionInfo, ExecutionListener};
pub use pipeline::{ProcessMessageArgs, ReceptionPipeline};
