pub mod engine;
pub mod visibility;

pub use engine::{CreateRefillRequest, WorkflowEngine};
pub use visibility::VisibilityScope;
