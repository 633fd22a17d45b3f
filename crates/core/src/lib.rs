pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod storage;
pub mod workflow;

pub use domain::principal::{Principal, Role};
pub use domain::refill::{
    ApprovalAction, ApprovalRecord, Decision, RefillRequest, RefillRequestId, RefillStatus,
};
pub use errors::WorkflowError;
pub use identity::{AuthError, UserAccount};
pub use storage::{InMemoryRefillStore, RefillRequestStore, RequestFilter, StoreError};
pub use workflow::{CreateRefillRequest, VisibilityScope, WorkflowEngine};
