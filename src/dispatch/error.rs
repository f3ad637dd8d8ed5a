//! Dispatch errors.

use super::ScheduledDispatch;
use crate::serializer::SerializationError;
use crate::transport::TransportError;

/// Failure while turning dispatches into sent messages.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The payload type was never registered for dispatch.
    #[error("no dispatch registration for payload type {payload_type}")]
    DispatchRegistrationNotFound { payload_type: &'static str },

    #[error("no sender registered for queue '{resource_id}'")]
    QueueSenderNotFound { resource_id: String },

    #[error("no sender registered for topic '{resource_id}'")]
    TopicSenderNotFound { resource_id: String },

    /// A single message does not fit in an empty batch.
    #[error(
        "message '{message_id}' for '{resource_id}' is {size} bytes, larger than the \
         maximum batch size of {max_size} bytes"
    )]
    MessageTooLarge {
        message_id: String,
        resource_id: String,
        size: usize,
        max_size: usize,
    },

    #[error("failed to serialize payload '{payload_type_id}': {source}")]
    Serialization {
        payload_type_id: String,
        #[source]
        source: SerializationError,
    },

    #[error("transport failed for '{resource_id}': {source}")]
    Transport {
        resource_id: String,
        #[source]
        source: TransportError,
    },

    /// The transport answered a schedule call with the wrong number of
    /// sequence numbers.
    #[error(
        "scheduling on '{resource_id}' returned {actual} sequence numbers for {expected} messages"
    )]
    SequenceNumberMismatch {
        resource_id: String,
        expected: usize,
        actual: usize,
    },

    /// Scheduling stopped part way. `scheduled` lists what is already on the
    /// broker and still needs cancelling if the whole set is unwanted.
    #[error("scheduling failed after {} messages were scheduled: {source}", .scheduled.len())]
    PartialSchedule {
        scheduled: Vec<ScheduledDispatch>,
        #[source]
        source: Box<DispatchError>,
    },

    #[error("dispatch cancelled")]
    Cancelled,
}

impl DispatchError {
    pub(crate) fn transport(resource_id: &str, source: TransportError) -> Self {
        DispatchError::Transport {
            resource_id: resource_id.to_string(),
            source,
        }
    }
}
