//! Error types for the approval layer

use crate::{UserId, WorkflowInstanceId, WorkflowState};

/// Errors that can occur in approval workflow operations
///
/// Every error is scoped to a single instance and operation; none of
/// them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Operation '{operation}' not allowed on instance {instance_id} in state {state}")]
    InvalidState {
        instance_id: WorkflowInstanceId,
        state: WorkflowState,
        operation: &'static str,
    },

    #[error("User '{actor}' is not authorized: {reason}")]
    NotAuthorized { actor: UserId, reason: String },

    #[error("A rejection requires non-empty comments")]
    MissingComments,

    #[error("Decision already recorded for level {level} by '{actor}'")]
    DuplicateDecision { actor: UserId, level: usize },

    #[error("Instance {instance_id} was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification {
        instance_id: WorkflowInstanceId,
        expected: u64,
        actual: u64,
    },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Workflow instance already exists: {0}")]
    DuplicateInstance(WorkflowInstanceId),
}

impl ApprovalError {
    /// Whether the caller may retry the operation against fresh state.
    ///
    /// Validation and authorization failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApprovalError::ConcurrentModification { .. } | ApprovalError::Unavailable(_)
        )
    }
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;
