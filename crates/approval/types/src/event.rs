//! Events emitted by the engine for the notifier

use crate::{FinalOutcome, UserId, WorkflowInstanceId};
use serde::{Deserialize, Serialize};

/// A state change worth telling someone about
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// An approver has a decision to make
    LevelActivated {
        instance_id: WorkflowInstanceId,
        approver: UserId,
        level: usize,
    },
    /// The instance reached a terminal outcome through a decision or cancellation
    Finalized {
        instance_id: WorkflowInstanceId,
        outcome: FinalOutcome,
    },
    /// The instance ran past its due date
    Expired { instance_id: WorkflowInstanceId },
}

impl WorkflowEvent {
    pub fn instance_id(&self) -> &WorkflowInstanceId {
        match self {
            WorkflowEvent::LevelActivated { instance_id, .. }
            | WorkflowEvent::Finalized { instance_id, .. }
            | WorkflowEvent::Expired { instance_id } => instance_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::LevelActivated { .. } => "level_activated",
            WorkflowEvent::Finalized { .. } => "finalized",
            WorkflowEvent::Expired { .. } => "expired",
        }
    }
}
