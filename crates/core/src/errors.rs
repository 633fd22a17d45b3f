use thiserror::Error;

use crate::domain::principal::Role;
use crate::domain::refill::{RefillRequestId, RefillStatus};
use crate::storage::StoreError;

/// Engine-level error taxonomy. Every variant reaches the caller as a typed
/// value; the API surface maps them to transport status codes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("role `{role_name}` is not permitted to {operation}", role_name = .role.as_str())]
    Unauthorized { role: Role, operation: &'static str },
    #[error("refill request `{id}` not found", id = .request_id.0)]
    NotFound { request_id: RefillRequestId },
    #[error("refill request `{id}` already processed (status: {current})", id = .request_id.0, current = .status.as_str())]
    AlreadyProcessed { request_id: RefillRequestId, status: RefillStatus },
    #[error("invalid action `{action}` (expected approve|refuse)")]
    InvalidAction { action: String },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl WorkflowError {
    /// Conflict errors (lost race or already-terminal request) are safe for
    /// clients to resolve by refreshing; nothing else should be blindly retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyProcessed { .. })
    }
}
