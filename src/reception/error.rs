//! Reception errors.

use std::error::Error;
use std::fmt;

use crate::client::ClientType;
use crate::dispatch::DispatchError;
use crate::serializer::SerializationError;
use crate::transport::TransportError;

/// Error returned by a message handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler refuses the message for a business reason.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The handler observed cancellation and gave up.
    #[error("handler cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        HandlerError::Rejected(reason.into())
    }

    /// Wrap any error.
    pub fn other<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        HandlerError::Other(Box::new(error))
    }
}

/// Failure of one or both steps of an isolation reroute.
///
/// Both steps are always attempted, so both errors may be present.
#[derive(Debug)]
pub struct RerouteError {
    pub complete_error: Option<TransportError>,
    pub resend_error: Option<TransportError>,
}

impl RerouteError {
    pub(crate) fn from_results(
        complete: Result<(), TransportError>,
        resend: Result<(), TransportError>,
    ) -> Result<(), Self> {
        match (complete, resend) {
            (Ok(()), Ok(())) => Ok(()),
            (complete, resend) => Err(RerouteError {
                complete_error: complete.err(),
                resend_error: resend.err(),
            }),
        }
    }
}

impl fmt::Display for RerouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("isolation reroute failed")?;
        if let Some(error) = &self.complete_error {
            write!(f, "; complete: {}", error)?;
        }
        if let Some(error) = &self.resend_error {
            write!(f, "; resend: {}", error)?;
        }
        Ok(())
    }
}

impl Error for RerouteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.resend_error
            .as_ref()
            .or(self.complete_error.as_ref())
            .map(|error| error as &(dyn Error + 'static))
    }
}

/// Why handling one received message failed.
#[derive(Debug, thiserror::Error)]
pub enum ReceptionError {
    /// The message has no `PayloadTypeId` property and cannot be routed.
    #[error("message is missing the PayloadTypeId property")]
    MissingPayloadTypeId,

    #[error("failed to deserialize payload '{payload_type_id}': {source}")]
    Deserialization {
        payload_type_id: String,
        #[source]
        source: SerializationError,
    },

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    /// The handler succeeded but its publications could not be sent.
    #[error("failed to publish handler dispatches: {0}")]
    Publish(#[source] DispatchError),

    #[error(transparent)]
    IsolationReroute(#[from] RerouteError),
}

/// A received message could not be processed.
///
/// Carries the full routing context so the transport's redelivery or
/// dead-letter handling can be diagnosed without replaying state.
#[derive(Debug)]
pub struct FailedToProcessMessage {
    pub client_type: ClientType,
    pub resource_id: String,
    pub message_id: String,
    pub payload_type_id: Option<String>,
    pub session_id: Option<String>,
    pub handler: Option<&'static str>,
    pub isolation_key: Option<String>,
    pub source: ReceptionError,
}

impl fmt::Display for FailedToProcessMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to process message '{}' on {} '{}' (payload type id: {}, session: {}, \
             handler: {}, isolation key: {}): {}",
            self.message_id,
            self.client_type,
            self.resource_id,
            self.payload_type_id.as_deref().unwrap_or("<none>"),
            self.session_id.as_deref().unwrap_or("<none>"),
            self.handler.unwrap_or("<none>"),
            self.isolation_key.as_deref().unwrap_or("<none>"),
            self.source
        )
    }
}

impl Error for FailedToProcessMessage {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}
