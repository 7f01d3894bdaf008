//! Approval engine: the service entry point
//!
//! Every mutating operation follows the same path:
//! 1. Load the instance and remember its version
//! 2. Apply the transition through the state machine
//! 3. Commit with the remembered version (stale writes are rejected)
//! 4. Hand the produced events to the notifier, best-effort
//!
//! Store and collaborator calls are bounded by a timeout. A timeout
//! surfaces as `Unavailable` and leaves the instance at its last
//! committed state.

use crate::{
    Clock, DashboardSnapshot, DecisionLedger, Directory, DocumentCatalog, InMemoryDocumentCatalog,
    InstanceStore, LedgerStatistics, Notification, Notifier, StateMachine, StoreConfig,
    SystemClock,
};
use approval_types::*;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// The approval workflow service
pub struct ApprovalEngine {
    store: Arc<dyn InstanceStore>,
    directory: Arc<dyn Directory>,
    documents: Arc<dyn DocumentCatalog>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    state_machine: StateMachine,
    operation_timeout: Duration,
}

impl ApprovalEngine {
    /// Create an engine on the system clock with default store settings
    pub fn new(
        store: Arc<dyn InstanceStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            directory,
            documents: Arc::new(InMemoryDocumentCatalog::new()),
            notifier,
            clock: Arc::new(SystemClock),
            state_machine: StateMachine::new(),
            operation_timeout: StoreConfig::default().operation_timeout(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentCatalog>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_store_config(mut self, config: &StoreConfig) -> Self {
        self.operation_timeout = config.operation_timeout();
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Validate a definition, check every approver against the directory
    /// and store a new draft instance.
    pub async fn create(
        &self,
        definition: WorkflowDefinition,
        requester: UserId,
    ) -> ApprovalResult<WorkflowInstance> {
        definition.validate()?;

        for approver in &definition.approvers {
            match self.resolve_user(approver).await? {
                Some(user) if user.enabled => {}
                Some(_) => {
                    return Err(ApprovalError::InvalidDefinition(format!(
                        "approver '{}' is disabled in the directory",
                        approver
                    )))
                }
                None => {
                    return Err(ApprovalError::InvalidDefinition(format!(
                        "approver '{}' does not exist in the directory",
                        approver
                    )))
                }
            }
        }

        let instance = self
            .state_machine
            .create(definition, requester, self.clock.now())?;
        let stored = self
            .bounded("insert", self.store.insert(instance))
            .await?;

        tracing::info!(
            instance_id = %stored.id,
            document = %stored.definition.document_ref,
            mode = ?stored.definition.mode,
            approvers = stored.definition.level_count(),
            "Workflow instance created"
        );
        Ok(stored)
    }

    /// Move a draft to `Pending`
    pub async fn submit_for_review(
        &self,
        id: &WorkflowInstanceId,
    ) -> ApprovalResult<WorkflowInstance> {
        self.apply(id, |sm, instance, now| {
            sm.submit_for_review(instance, now).map(Some)
        })
        .await
    }

    /// Open level 0 and start the deadline
    pub async fn activate(&self, id: &WorkflowInstanceId) -> ApprovalResult<WorkflowInstance> {
        self.apply(id, |sm, instance, now| sm.activate(instance, now).map(Some))
            .await
    }

    /// Take a decision from an approver (or their delegate)
    pub async fn submit_decision(
        &self,
        id: &WorkflowInstanceId,
        request: DecisionRequest,
    ) -> ApprovalResult<WorkflowInstance> {
        let actor_active = self
            .resolve_user(&request.actor)
            .await?
            .is_some_and(|user| user.enabled);

        self.apply(id, move |sm, instance, now| {
            if instance.is_in_review() && !actor_active {
                return Err(ApprovalError::NotAuthorized {
                    actor: request.actor.clone(),
                    reason: "user is missing or disabled in the directory".into(),
                });
            }
            sm.submit_decision(instance, request, now).map(Some)
        })
        .await
    }

    /// Cancel on behalf of the requester
    pub async fn cancel(
        &self,
        id: &WorkflowInstanceId,
        requester: &UserId,
        reason: impl Into<String>,
    ) -> ApprovalResult<WorkflowInstance> {
        let reason = reason.into();
        self.apply(id, |sm, instance, now| {
            sm.cancel(instance, requester, reason, now).map(Some)
        })
        .await
    }

    /// Replace the due date with `now + extension`
    pub async fn renew_deadline(
        &self,
        id: &WorkflowInstanceId,
        requester: &UserId,
        extension: chrono::Duration,
    ) -> ApprovalResult<WorkflowInstance> {
        self.apply(id, |sm, instance, now| {
            sm.renew_deadline(instance, requester, extension, now)
                .map(Some)
        })
        .await
    }

    /// Let `delegate` decide for the approver at `level`
    pub async fn assign_delegate(
        &self,
        id: &WorkflowInstanceId,
        requester: &UserId,
        level: usize,
        delegate: UserId,
    ) -> ApprovalResult<WorkflowInstance> {
        match self.resolve_user(&delegate).await? {
            Some(user) if user.enabled => {}
            _ => {
                return Err(ApprovalError::InvalidDefinition(format!(
                    "delegate '{}' is missing or disabled in the directory",
                    delegate
                )))
            }
        }

        self.apply(id, |sm, instance, now| {
            sm.assign_delegate(instance, requester, level, delegate, now)
                .map(Some)
        })
        .await
    }

    /// Expire the instance if it is in review and `now` is past its due date.
    ///
    /// Returns whether this call expired it; repeated calls return `false`.
    pub async fn expire_if_overdue(
        &self,
        id: &WorkflowInstanceId,
        now: DateTime<Utc>,
    ) -> ApprovalResult<bool> {
        let mut expired = false;
        self.apply_at(id, now, |sm, instance, now| {
            let events = sm.expire_if_overdue(instance, now);
            expired = events.is_some();
            Ok(events)
        })
        .await?;
        Ok(expired)
    }

    // ── Query ────────────────────────────────────────────────────────

    pub async fn get(&self, id: &WorkflowInstanceId) -> ApprovalResult<WorkflowInstance> {
        self.load(id).await
    }

    /// Completion percentage, rounded down
    pub async fn compute_progress(&self, id: &WorkflowInstanceId) -> ApprovalResult<u8> {
        let instance = self.load(id).await?;
        Ok(self.state_machine.progress(&instance))
    }

    /// Decisions in the order they were recorded
    pub async fn history(&self, id: &WorkflowInstanceId) -> ApprovalResult<Vec<Decision>> {
        let instance = self.load(id).await?;
        Ok(DecisionLedger::new(&instance).history().cloned().collect())
    }

    pub async fn average_response_latency(
        &self,
        id: &WorkflowInstanceId,
    ) -> ApprovalResult<chrono::Duration> {
        let instance = self.load(id).await?;
        Ok(DecisionLedger::new(&instance).average_response_latency())
    }

    pub async fn decision_statistics(
        &self,
        id: &WorkflowInstanceId,
    ) -> ApprovalResult<LedgerStatistics> {
        let instance = self.load(id).await?;
        Ok(DecisionLedger::new(&instance).statistics())
    }

    /// Instances currently waiting on reviewers
    pub async fn in_review(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.bounded(
            "list_by_state",
            self.store.list_by_state(WorkflowState::InReview),
        )
        .await
    }

    /// Every stored instance, in no particular order
    pub async fn instances(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.bounded("list", self.store.list()).await
    }

    /// Read-only aggregate over every instance
    pub async fn dashboard(&self) -> ApprovalResult<DashboardSnapshot> {
        let instances = self.instances().await?;
        Ok(DashboardSnapshot::from_instances(
            &instances,
            self.clock.now(),
        ))
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn load(&self, id: &WorkflowInstanceId) -> ApprovalResult<WorkflowInstance> {
        self.bounded("get", self.store.get(id))
            .await?
            .ok_or_else(|| ApprovalError::InstanceNotFound(id.clone()))
    }

    async fn apply<F>(&self, id: &WorkflowInstanceId, op: F) -> ApprovalResult<WorkflowInstance>
    where
        F: FnOnce(
            &StateMachine,
            &mut WorkflowInstance,
            DateTime<Utc>,
        ) -> ApprovalResult<Option<Vec<WorkflowEvent>>>,
    {
        self.apply_at(id, self.clock.now(), op).await
    }

    /// Load, transition, commit, notify. `Ok(None)` from `op` means no
    /// change and skips the commit.
    async fn apply_at<F>(
        &self,
        id: &WorkflowInstanceId,
        now: DateTime<Utc>,
        op: F,
    ) -> ApprovalResult<WorkflowInstance>
    where
        F: FnOnce(
            &StateMachine,
            &mut WorkflowInstance,
            DateTime<Utc>,
        ) -> ApprovalResult<Option<Vec<WorkflowEvent>>>,
    {
        let mut instance = self.load(id).await?;
        let read_version = instance.version;

        let events = match op(&self.state_machine, &mut instance, now)? {
            Some(events) => events,
            None => return Ok(instance),
        };

        let committed = match self
            .bounded("commit", self.store.commit(instance, read_version))
            .await
        {
            Ok(committed) => committed,
            Err(err) => {
                if let ApprovalError::ConcurrentModification { .. } = err {
                    tracing::warn!(instance_id = %id, error = %err, "Stale write rejected");
                }
                return Err(err);
            }
        };

        self.dispatch(&committed, events).await;
        Ok(committed)
    }

    /// Deliver events for a committed transition; failures are logged only
    async fn dispatch(&self, instance: &WorkflowInstance, events: Vec<WorkflowEvent>) {
        if events.is_empty() {
            return;
        }

        let document_title = match tokio::time::timeout(
            self.operation_timeout,
            self.documents.describe(&instance.definition.document_ref),
        )
        .await
        {
            Ok(Ok(summary)) => summary.map(|s| s.title),
            Ok(Err(err)) => {
                tracing::warn!(instance_id = %instance.id, error = %err, "Document lookup failed");
                None
            }
            Err(_) => {
                tracing::warn!(instance_id = %instance.id, "Document lookup timed out");
                None
            }
        };

        for event in events {
            let notification = Notification {
                event,
                document_ref: instance.definition.document_ref.clone(),
                document_title: document_title.clone(),
                requester: instance.requester.clone(),
                emitted_at: self.clock.now(),
            };
            match tokio::time::timeout(self.operation_timeout, self.notifier.notify(&notification))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    instance_id = %instance.id,
                    event = notification.event.kind(),
                    error = %err,
                    "Notification failed"
                ),
                Err(_) => tracing::warn!(
                    instance_id = %instance.id,
                    event = notification.event.kind(),
                    "Notification timed out"
                ),
            }
        }
    }

    async fn resolve_user(&self, id: &UserId) -> ApprovalResult<Option<crate::UserRecord>> {
        match tokio::time::timeout(self.operation_timeout, self.directory.resolve_user(id)).await {
            Ok(Ok(user)) => Ok(user),
            Ok(Err(err)) => Err(ApprovalError::Unavailable(err.to_string())),
            Err(_) => Err(ApprovalError::Unavailable(format!(
                "directory lookup timed out after {}ms",
                self.operation_timeout.as_millis()
            ))),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = ApprovalResult<T>>,
    ) -> ApprovalResult<T> {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| {
                ApprovalError::Unavailable(format!(
                    "store {} timed out after {}ms",
                    operation,
                    self.operation_timeout.as_millis()
                ))
            })?
    }
}
