//! Decisions: the approve/reject actions recorded against an instance
//!
//! Decisions are append-only. They are created by the state machine's
//! intake and never mutated or deleted afterwards.

use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an approver decided
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approved,
    Rejected,
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionAction::Approved => write!(f, "approved"),
            DecisionAction::Rejected => write!(f, "rejected"),
        }
    }
}

/// A recorded decision
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The approver slot this decision resolves
    pub level: usize,
    /// Who issued it (the approver or their delegate)
    pub actor: UserId,
    pub action: DecisionAction,
    #[serde(default)]
    pub comments: String,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds between level activation and the decision
    pub response_latency_ms: i64,
}

impl Decision {
    pub fn response_latency(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.response_latency_ms)
    }

    pub fn is_approval(&self) -> bool {
        self.action == DecisionAction::Approved
    }
}

/// A decision submitted by a caller, before intake
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub actor: UserId,
    pub action: DecisionAction,
    #[serde(default)]
    pub comments: String,
    /// The level the caller believes is open. Lets a retried request that
    /// was already applied surface as a duplicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
}

impl DecisionRequest {
    pub fn approve(actor: UserId) -> Self {
        Self {
            actor,
            action: DecisionAction::Approved,
            comments: String::new(),
            level: None,
        }
    }

    pub fn reject(actor: UserId, comments: impl Into<String>) -> Self {
        Self {
            actor,
            action: DecisionAction::Rejected,
            comments: comments.into(),
            level: None,
        }
    }

    pub fn at_level(mut self, level: usize) -> Self {
        self.level = Some(level);
        self
    }

    /// Rejections must carry a justification
    pub fn has_required_comments(&self) -> bool {
        match self.action {
            DecisionAction::Approved => true,
            DecisionAction::Rejected => !self.comments.trim().is_empty(),
        }
    }
}
