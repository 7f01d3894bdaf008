//! State machine: lifecycle transitions and decision intake
//!
//! The state machine is the heart of the approval engine. It decides
//! whose turn it is, records decisions, advances levels and finalizes
//! instances. It works on an in-memory instance and returns the events
//! a transition produced; persisting the result and delivering the
//! events is the engine's job.

use approval_types::*;
use chrono::{DateTime, Utc};

/// Applies legal transitions to workflow instances
#[derive(Clone, Copy, Debug, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Validate a definition and create a draft instance owning a copy of it.
    pub fn create(
        &self,
        definition: WorkflowDefinition,
        requester: UserId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<WorkflowInstance> {
        definition.validate()?;
        Ok(WorkflowInstance::new(definition, requester, now))
    }

    /// Queue a draft for review (`Draft -> Pending`)
    pub fn submit_for_review(
        &self,
        instance: &mut WorkflowInstance,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        ensure_state(instance, &[WorkflowState::Draft], "submit_for_review")?;
        self.move_to(instance, WorkflowState::Pending, now);
        Ok(Vec::new())
    }

    /// Open level 0 and start the deadline clock.
    pub fn activate(
        &self,
        instance: &mut WorkflowInstance,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        ensure_state(
            instance,
            &[WorkflowState::Draft, WorkflowState::Pending],
            "activate",
        )?;

        let due_at = instance.definition.due_at(now)?;

        instance.requested_at = Some(now);
        instance.due_at = Some(due_at);
        instance.current_level = 0;
        instance.level_activated_at = Some(now);
        self.move_to(instance, WorkflowState::InReview, now);

        let events = match instance.mode() {
            ApprovalMode::Sequential => vec![level_activated(instance, 0)],
            ApprovalMode::Unanimous => (0..instance.definition.level_count())
                .map(|level| level_activated(instance, level))
                .collect(),
        };
        Ok(events)
    }

    /// Record a decision and advance, hold or finalize the instance.
    ///
    /// Checks run in order: replay of an applied decision, state,
    /// authorization (including duplicates), then rejection comments.
    /// A failed check leaves the instance untouched.
    pub fn submit_decision(
        &self,
        instance: &mut WorkflowInstance,
        request: DecisionRequest,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        check_replayed(instance, &request)?;
        ensure_state(instance, &[WorkflowState::InReview], "submit_decision")?;

        let level = match instance.mode() {
            ApprovalMode::Sequential => authorize_sequential(instance, &request)?,
            ApprovalMode::Unanimous => authorize_unanimous(instance, &request)?,
        };

        if !request.has_required_comments() {
            return Err(ApprovalError::MissingComments);
        }

        let activated_at = instance
            .level_activated_at
            .or(instance.requested_at)
            .unwrap_or(now);
        let decision = Decision {
            level,
            actor: request.actor,
            action: request.action,
            comments: request.comments,
            timestamp: now,
            response_latency_ms: (now - activated_at).num_milliseconds().max(0),
        };

        tracing::debug!(
            instance_id = %instance.id,
            level,
            actor = %decision.actor,
            action = %decision.action,
            "Decision recorded"
        );

        let action = decision.action;
        instance.decisions.push(decision.clone());
        instance.updated_at = now;

        if action == DecisionAction::Rejected {
            let outcome = FinalOutcome::Rejected {
                by: decision.actor,
                level,
                comments: decision.comments,
            };
            return Ok(vec![self.finalize(instance, outcome, now)]);
        }

        match instance.mode() {
            ApprovalMode::Sequential => {
                instance.current_level += 1;
                if instance.current_level == instance.definition.level_count() {
                    Ok(vec![self.finalize(instance, FinalOutcome::Approved, now)])
                } else {
                    instance.level_activated_at = Some(now);
                    Ok(vec![level_activated(instance, instance.current_level)])
                }
            }
            ApprovalMode::Unanimous => {
                let all_approved = (0..instance.definition.level_count()).all(|slot| {
                    instance
                        .decision_for_level(slot)
                        .is_some_and(Decision::is_approval)
                });
                if all_approved {
                    Ok(vec![self.finalize(instance, FinalOutcome::Approved, now)])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Cancel a non-terminal instance on behalf of its requester.
    pub fn cancel(
        &self,
        instance: &mut WorkflowInstance,
        requester: &UserId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        ensure_state(
            instance,
            &[
                WorkflowState::Draft,
                WorkflowState::Pending,
                WorkflowState::InReview,
            ],
            "cancel",
        )?;
        ensure_requester(instance, requester, "only the requester may cancel")?;

        let outcome = FinalOutcome::Cancelled {
            by: requester.clone(),
            reason: reason.into(),
        };
        Ok(vec![self.finalize(instance, outcome, now)])
    }

    /// Expire an in-review instance whose due date has passed.
    ///
    /// Returns `None` when nothing changed, which makes repeated calls no-ops.
    pub fn expire_if_overdue(
        &self,
        instance: &mut WorkflowInstance,
        now: DateTime<Utc>,
    ) -> Option<Vec<WorkflowEvent>> {
        if !instance.is_overdue(now) {
            return None;
        }

        self.close(instance, FinalOutcome::Expired, now);
        tracing::info!(
            instance_id = %instance.id,
            due_at = ?instance.due_at,
            "Workflow instance expired"
        );
        Some(vec![WorkflowEvent::Expired {
            instance_id: instance.id.clone(),
        }])
    }

    /// Replace the due date with `now + extension`.
    pub fn renew_deadline(
        &self,
        instance: &mut WorkflowInstance,
        requester: &UserId,
        extension: chrono::Duration,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        ensure_state(instance, &[WorkflowState::InReview], "renew_deadline")?;
        ensure_requester(instance, requester, "only the requester may renew")?;
        if extension <= chrono::Duration::zero() {
            return Err(ApprovalError::InvalidDefinition(
                "deadline extension must be positive".into(),
            ));
        }

        let due_at = now.checked_add_signed(extension).ok_or_else(|| {
            ApprovalError::InvalidDefinition("deadline extension is out of range".into())
        })?;

        instance.due_at = Some(due_at);
        instance.updated_at = now;
        Ok(Vec::new())
    }

    /// Let `delegate` decide on behalf of the approver at `level`.
    ///
    /// The approver list itself is never modified.
    pub fn assign_delegate(
        &self,
        instance: &mut WorkflowInstance,
        requester: &UserId,
        level: usize,
        delegate: UserId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<Vec<WorkflowEvent>> {
        ensure_state(
            instance,
            &[
                WorkflowState::Draft,
                WorkflowState::Pending,
                WorkflowState::InReview,
            ],
            "assign_delegate",
        )?;
        ensure_requester(instance, requester, "only the requester may delegate")?;

        if level >= instance.definition.level_count() {
            return Err(ApprovalError::InvalidDefinition(format!(
                "level {} does not exist",
                level
            )));
        }
        if instance.definition.level_of(&delegate).is_some() {
            return Err(ApprovalError::InvalidDefinition(format!(
                "'{}' is already an approver and cannot be a delegate",
                delegate
            )));
        }

        if let Some((other, _)) = instance
            .delegations
            .iter()
            .find(|(assigned, d)| **assigned != level && **d == delegate)
        {
            return Err(ApprovalError::InvalidDefinition(format!(
                "'{}' already stands in for level {}",
                delegate, other
            )));
        }

        instance.delegations.insert(level, delegate);
        instance.updated_at = now;
        Ok(Vec::new())
    }

    /// Completion percentage, rounded down.
    ///
    /// Approved and rejected instances report 100. Otherwise sequential
    /// instances count passed levels and unanimous instances count votes.
    pub fn progress(&self, instance: &WorkflowInstance) -> u8 {
        match instance.state {
            WorkflowState::Approved | WorkflowState::Rejected => return 100,
            WorkflowState::Draft
            | WorkflowState::Pending
            | WorkflowState::InReview
            | WorkflowState::Cancelled
            | WorkflowState::Expired => {}
        }

        let total = instance.definition.level_count();
        if total == 0 {
            return 0;
        }
        let done = match instance.mode() {
            ApprovalMode::Sequential => instance.current_level,
            ApprovalMode::Unanimous => instance.decision_count(),
        };
        (done.min(total) * 100 / total) as u8
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn move_to(&self, instance: &mut WorkflowInstance, next: WorkflowState, now: DateTime<Utc>) {
        debug_assert!(instance.state.can_transition_to(next));
        tracing::info!(
            instance_id = %instance.id,
            from = %instance.state,
            to = %next,
            "Workflow state changed"
        );
        instance.state = next;
        instance.updated_at = now;
    }

    fn close(&self, instance: &mut WorkflowInstance, outcome: FinalOutcome, now: DateTime<Utc>) {
        self.move_to(instance, outcome.state(), now);
        instance.finalized_at = Some(now);
        instance.final_outcome = Some(outcome);
    }

    fn finalize(
        &self,
        instance: &mut WorkflowInstance,
        outcome: FinalOutcome,
        now: DateTime<Utc>,
    ) -> WorkflowEvent {
        self.close(instance, outcome.clone(), now);
        WorkflowEvent::Finalized {
            instance_id: instance.id.clone(),
            outcome,
        }
    }
}

fn ensure_state(
    instance: &WorkflowInstance,
    allowed: &[WorkflowState],
    operation: &'static str,
) -> ApprovalResult<()> {
    if allowed.contains(&instance.state) {
        Ok(())
    } else {
        Err(ApprovalError::InvalidState {
            instance_id: instance.id.clone(),
            state: instance.state,
            operation,
        })
    }
}

fn ensure_requester(
    instance: &WorkflowInstance,
    caller: &UserId,
    reason: &str,
) -> ApprovalResult<()> {
    if &instance.requester == caller {
        Ok(())
    } else {
        Err(ApprovalError::NotAuthorized {
            actor: caller.clone(),
            reason: reason.to_string(),
        })
    }
}

fn level_activated(instance: &WorkflowInstance, level: usize) -> WorkflowEvent {
    let approver = instance
        .delegations
        .get(&level)
        .or_else(|| instance.definition.approvers.get(level))
        .cloned()
        .unwrap_or_else(|| UserId::new(""));
    WorkflowEvent::LevelActivated {
        instance_id: instance.id.clone(),
        approver,
        level,
    }
}

/// A request naming a level that already holds this actor's decision was
/// applied before, whatever state the instance has moved on to.
fn check_replayed(instance: &WorkflowInstance, request: &DecisionRequest) -> ApprovalResult<()> {
    match request.level {
        Some(level)
            if instance
                .decision_for_level(level)
                .is_some_and(|d| d.actor == request.actor) =>
        {
            Err(ApprovalError::DuplicateDecision {
                actor: request.actor.clone(),
                level,
            })
        }
        _ => Ok(()),
    }
}

/// A request naming a level other than the open one is out of order.
fn check_stale_level(
    instance: &WorkflowInstance,
    request: &DecisionRequest,
    open_level: usize,
) -> ApprovalResult<()> {
    match request.level {
        Some(claimed) if claimed != open_level => Err(ApprovalError::NotAuthorized {
            actor: request.actor.clone(),
            reason: format!(
                "level {} is not open for {} (open level is {})",
                claimed, instance.id, open_level
            ),
        }),
        _ => Ok(()),
    }
}

fn authorize_sequential(
    instance: &WorkflowInstance,
    request: &DecisionRequest,
) -> ApprovalResult<usize> {
    let level = instance.current_level;
    check_stale_level(instance, request, level)?;

    if !instance.may_decide_for(&request.actor, level) {
        return Err(ApprovalError::NotAuthorized {
            actor: request.actor.clone(),
            reason: format!("not the approver for level {}", level),
        });
    }
    Ok(level)
}

fn authorize_unanimous(
    instance: &WorkflowInstance,
    request: &DecisionRequest,
) -> ApprovalResult<usize> {
    let level = instance
        .level_for_actor(&request.actor)
        .ok_or_else(|| ApprovalError::NotAuthorized {
            actor: request.actor.clone(),
            reason: "not an approver of this workflow".into(),
        })?;
    check_stale_level(instance, request, level)?;

    if instance.decision_for_level(level).is_some() {
        return Err(ApprovalError::DuplicateDecision {
            actor: request.actor.clone(),
            level,
        });
    }
    Ok(level)
}
