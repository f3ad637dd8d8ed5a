//! Execution listeners observe every message the pipeline dispatches.

use std::time::Duration;

use super::ReceptionError;
use crate::client::ClientType;

/// What is being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub client_type: ClientType,
    pub resource_id: String,
    pub message_id: String,
    pub payload_type_id: Option<String>,
    /// Handler type name, once resolved.
    pub handler: Option<&'static str>,
}

/// Hook into message execution, e.g. for metrics.
///
/// Every method defaults to a no-op.
pub trait ExecutionListener: Send + Sync {
    fn on_execution_start(&self, _info: &ExecutionInfo) {}

    fn on_execution_success(&self, _info: &ExecutionInfo, _elapsed: Duration) {}

    fn on_execution_failed(&self, _info: &ExecutionInfo, _error: &ReceptionError) {}
}
