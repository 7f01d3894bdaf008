//! Workflow definitions: who must review a document, and how
//!
//! A definition is an ordered chain of approvers plus the rules that
//! govern it. It is snapshotted into exactly one instance at creation
//! and never changes afterwards.

use crate::{ApprovalError, ApprovalResult, DocumentRef, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Longest deadline a definition may carry (ten years)
pub const MAX_DEADLINE_SECS: u64 = 10 * 366 * 24 * 3600;

/// How approvers interact with the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Approvers act one after another; any rejection stops the chain
    Sequential,
    /// All approvers act on the same round as peers; any rejection stops the round
    Unanimous,
}

/// Informational priority; never alters transition rules
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// The blueprint for one approval run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// The entity being approved
    pub document_ref: DocumentRef,
    /// Ordered approver chain
    pub approvers: Vec<UserId>,
    pub mode: ApprovalMode,
    #[serde(default)]
    pub priority: Priority,
    /// Time from activation to due date (seconds)
    pub deadline_secs: u64,
}

impl WorkflowDefinition {
    /// Create a definition with medium priority
    pub fn new(
        document_ref: DocumentRef,
        approvers: Vec<UserId>,
        mode: ApprovalMode,
        deadline_secs: u64,
    ) -> Self {
        Self {
            document_ref,
            approvers,
            mode,
            priority: Priority::default(),
            deadline_secs,
        }
    }

    /// Sequential chain over the given approvers
    pub fn sequential(
        document_ref: DocumentRef,
        approvers: impl IntoIterator<Item = UserId>,
        deadline_secs: u64,
    ) -> Self {
        Self::new(
            document_ref,
            approvers.into_iter().collect(),
            ApprovalMode::Sequential,
            deadline_secs,
        )
    }

    /// Unanimous round over the given approvers
    pub fn unanimous(
        document_ref: DocumentRef,
        approvers: impl IntoIterator<Item = UserId>,
        deadline_secs: u64,
    ) -> Self {
        Self::new(
            document_ref,
            approvers.into_iter().collect(),
            ApprovalMode::Unanimous,
            deadline_secs,
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Deadline as a duration, `None` when it does not fit a `chrono::Duration`
    pub fn deadline(&self) -> Option<chrono::Duration> {
        i64::try_from(self.deadline_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    /// Due date for a round opened at `opened_at`
    pub fn due_at(&self, opened_at: DateTime<Utc>) -> ApprovalResult<DateTime<Utc>> {
        self.deadline()
            .and_then(|deadline| opened_at.checked_add_signed(deadline))
            .ok_or_else(|| {
                ApprovalError::InvalidDefinition(format!(
                    "deadline of {}s is out of range",
                    self.deadline_secs
                ))
            })
    }

    /// Number of approver slots
    pub fn level_count(&self) -> usize {
        self.approvers.len()
    }

    /// Slot index of an approver, if present
    pub fn level_of(&self, user: &UserId) -> Option<usize> {
        self.approvers.iter().position(|a| a == user)
    }

    /// Validate the definition.
    ///
    /// Approvers must be non-empty and unique; the deadline must be positive.
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.approvers.is_empty() {
            return Err(ApprovalError::InvalidDefinition(
                "approver list must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for approver in &self.approvers {
            if approver.as_str().trim().is_empty() {
                return Err(ApprovalError::InvalidDefinition(
                    "approver identifiers must not be blank".into(),
                ));
            }
            if !seen.insert(approver) {
                return Err(ApprovalError::InvalidDefinition(format!(
                    "approver '{}' appears more than once",
                    approver
                )));
            }
        }

        if self.deadline_secs == 0 {
            return Err(ApprovalError::InvalidDefinition(
                "deadline must be a positive duration".into(),
            ));
        }
        if self.deadline_secs > MAX_DEADLINE_SECS {
            return Err(ApprovalError::InvalidDefinition(format!(
                "deadline of {}s exceeds the maximum of {}s",
                self.deadline_secs, MAX_DEADLINE_SECS
            )));
        }

        Ok(())
    }
}
