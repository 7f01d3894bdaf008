//! Workflow instances: one concrete approval run against one document
//!
//! An instance owns a snapshot of its definition, its lifecycle state,
//! the append-only decision list and the version number used for
//! optimistic concurrency in the store.

use crate::{ApprovalMode, Decision, UserId, WorkflowDefinition, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reason attached to instances that ran past their due date
pub const EXPIRED_REASON: &str = "expired";

// ── Lifecycle State ──────────────────────────────────────────────────

/// Lifecycle state of an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    Pending,
    InReview,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 7] = [
        WorkflowState::Draft,
        WorkflowState::Pending,
        WorkflowState::InReview,
        WorkflowState::Approved,
        WorkflowState::Rejected,
        WorkflowState::Cancelled,
        WorkflowState::Expired,
    ];

    pub fn is_terminal(&self) -> bool {
        match self {
            WorkflowState::Draft | WorkflowState::Pending | WorkflowState::InReview => false,
            WorkflowState::Approved
            | WorkflowState::Rejected
            | WorkflowState::Cancelled
            | WorkflowState::Expired => true,
        }
    }

    /// The declared transition graph.
    ///
    /// `Draft -> Pending -> InReview -> {Approved | Rejected | Expired}`,
    /// `Draft -> InReview` on direct activation, and any non-terminal
    /// state may be cancelled.
    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, next) {
            (Draft, Pending) | (Draft, InReview) | (Pending, InReview) => true,
            (InReview, Approved) | (InReview, Rejected) | (InReview, Expired) => true,
            (Draft | Pending | InReview, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowState::Draft => "draft",
            WorkflowState::Pending => "pending",
            WorkflowState::InReview => "in_review",
            WorkflowState::Approved => "approved",
            WorkflowState::Rejected => "rejected",
            WorkflowState::Cancelled => "cancelled",
            WorkflowState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

// ── Final Outcome ────────────────────────────────────────────────────

/// How a finalized instance ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalOutcome {
    Approved,
    Rejected {
        by: UserId,
        level: usize,
        comments: String,
    },
    Cancelled {
        by: UserId,
        reason: String,
    },
    Expired,
}

impl FinalOutcome {
    /// The terminal state this outcome corresponds to
    pub fn state(&self) -> WorkflowState {
        match self {
            FinalOutcome::Approved => WorkflowState::Approved,
            FinalOutcome::Rejected { .. } => WorkflowState::Rejected,
            FinalOutcome::Cancelled { .. } => WorkflowState::Cancelled,
            FinalOutcome::Expired => WorkflowState::Expired,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            FinalOutcome::Approved => None,
            FinalOutcome::Rejected { comments, .. } => Some(comments),
            FinalOutcome::Cancelled { reason, .. } => Some(reason),
            FinalOutcome::Expired => Some(EXPIRED_REASON),
        }
    }
}

impl std::fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({})", self.state(), reason),
            None => write!(f, "{}", self.state()),
        }
    }
}

// ── Workflow Instance ────────────────────────────────────────────────

/// A single approval run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowInstanceId,
    /// Snapshot of the definition taken at creation
    pub definition: WorkflowDefinition,
    /// Who asked for the approval
    pub requester: UserId,
    pub state: WorkflowState,
    /// Open approver slot; meaningful only while in review
    pub current_level: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// When the currently open level became actionable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_activated_at: Option<DateTime<Utc>>,
    pub decisions: Vec<Decision>,
    /// Substitutes allowed to decide on behalf of a level's approver
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub delegations: BTreeMap<usize, UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_outcome: Option<FinalOutcome>,
    /// Incremented by the store on every committed write
    pub version: u64,
}

impl WorkflowInstance {
    /// Create a draft instance owning a copy of the definition
    pub fn new(definition: WorkflowDefinition, requester: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: WorkflowInstanceId::generate(),
            definition,
            requester,
            state: WorkflowState::Draft,
            current_level: 0,
            requested_at: None,
            due_at: None,
            level_activated_at: None,
            decisions: Vec::new(),
            delegations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            finalized_at: None,
            final_outcome: None,
            version: 0,
        }
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn mode(&self) -> ApprovalMode {
        self.definition.mode
    }

    pub fn is_in_review(&self) -> bool {
        self.state == WorkflowState::InReview
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// In review with the due date strictly in the past
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_in_review() && self.due_at.is_some_and(|due| now > due)
    }

    /// The approver whose turn it is in sequential mode
    pub fn current_approver(&self) -> Option<&UserId> {
        if !self.is_in_review() || self.mode() != ApprovalMode::Sequential {
            return None;
        }
        self.definition.approvers.get(self.current_level)
    }

    /// Approvers still expected to act in the open round
    pub fn awaiting_approvers(&self) -> Vec<&UserId> {
        if !self.is_in_review() {
            return Vec::new();
        }
        match self.mode() {
            ApprovalMode::Sequential => self.current_approver().into_iter().collect(),
            ApprovalMode::Unanimous => self
                .definition
                .approvers
                .iter()
                .enumerate()
                .filter(|(level, _)| self.decision_for_level(*level).is_none())
                .map(|(_, approver)| approver)
                .collect(),
        }
    }

    /// Recorded decision for an approver slot
    pub fn decision_for_level(&self, level: usize) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.level == level)
    }

    /// Whether `actor` may decide for `level`: the named approver or the
    /// level's delegate
    pub fn may_decide_for(&self, actor: &UserId, level: usize) -> bool {
        self.definition.approvers.get(level) == Some(actor)
            || self.delegations.get(&level) == Some(actor)
    }

    /// Slot an actor speaks for, resolving delegation
    pub fn level_for_actor(&self, actor: &UserId) -> Option<usize> {
        self.definition.level_of(actor).or_else(|| {
            self.delegations
                .iter()
                .find(|(_, delegate)| *delegate == actor)
                .map(|(level, _)| *level)
        })
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }
}
