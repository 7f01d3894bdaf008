//! End-to-end workflow scenarios through the engine service

use approval_engine::*;
use approval_types::*;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

struct Fixture {
    engine: Arc<ApprovalEngine>,
    store: Arc<InMemoryInstanceStore>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryInstanceStore::new());
    fixture_with_store(store.clone(), store)
}

fn fixture_with_store(
    store: Arc<InMemoryInstanceStore>,
    engine_store: Arc<dyn InstanceStore>,
) -> Fixture {
    let directory = Arc::new(InMemoryDirectory::with_users(
        ["a", "b", "c"]
            .into_iter()
            .map(|id| UserRecord::new(id, id.to_uppercase())),
    ));
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let engine = ApprovalEngine::new(engine_store, directory, notifier.clone())
        .with_clock(clock.clone());
    Fixture {
        engine: Arc::new(engine),
        store,
        notifier,
        clock,
    }
}

fn abc() -> Vec<UserId> {
    vec![UserId::new("a"), UserId::new("b"), UserId::new("c")]
}

async fn start(fx: &Fixture, mode: ApprovalMode) -> WorkflowInstanceId {
    let def = WorkflowDefinition::new(DocumentRef::new("contract-17"), abc(), mode, 72 * 3600);
    let inst = fx.engine.create(def, UserId::new("req")).await.unwrap();
    fx.engine.activate(&inst.id).await.unwrap();
    inst.id
}

async fn approve(fx: &Fixture, id: &WorkflowInstanceId, actor: &str) -> WorkflowInstance {
    fx.engine
        .submit_decision(id, DecisionRequest::approve(UserId::new(actor)))
        .await
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn sequential_all_approve() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;

    let inst = approve(&fx, &id, "a").await;
    assert_eq!(inst.current_level, 1);
    assert_eq!(fx.engine.compute_progress(&id).await.unwrap(), 33);

    let inst = approve(&fx, &id, "b").await;
    assert_eq!(inst.current_level, 2);
    assert_eq!(fx.engine.compute_progress(&id).await.unwrap(), 66);

    let inst = approve(&fx, &id, "c").await;
    assert_eq!(inst.state, WorkflowState::Approved);
    assert_eq!(inst.final_outcome, Some(FinalOutcome::Approved));
    assert!(inst.finalized_at.is_some());
    assert_eq!(fx.engine.compute_progress(&id).await.unwrap(), 100);

    let events = fx.notifier.events_for(&id);
    let activated: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::LevelActivated { approver, .. } => Some(approver.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(activated, vec!["a", "b", "c"]);
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::Finalized {
            outcome: FinalOutcome::Approved,
            ..
        })
    ));
}

#[tokio::test]
async fn unanimous_one_rejects() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Unanimous).await;

    approve(&fx, &id, "a").await;
    let inst = approve(&fx, &id, "b").await;
    assert_eq!(inst.state, WorkflowState::InReview);
    assert_eq!(inst.current_level, 0);

    let inst = fx
        .engine
        .submit_decision(
            &id,
            DecisionRequest::reject(UserId::new("c"), "missing signature"),
        )
        .await
        .unwrap();
    assert_eq!(inst.state, WorkflowState::Rejected);
    match inst.final_outcome {
        Some(FinalOutcome::Rejected { by, comments, .. }) => {
            assert_eq!(by, UserId::new("c"));
            assert_eq!(comments, "missing signature");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let err = fx
        .engine
        .submit_decision(&id, DecisionRequest::approve(UserId::new("a")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidState { .. }));
}

#[tokio::test]
async fn overdue_instance_expires_once() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;

    fx.clock.advance(Duration::hours(73));
    let now = fx.engine.now();
    assert!(fx.engine.expire_if_overdue(&id, now).await.unwrap());

    let inst = fx.engine.get(&id).await.unwrap();
    assert!(inst.is_terminal());
    assert_eq!(inst.state, WorkflowState::Expired);
    assert_eq!(
        inst.final_outcome.as_ref().and_then(FinalOutcome::reason),
        Some(EXPIRED_REASON)
    );
    let version = inst.version;

    assert!(!fx.engine.expire_if_overdue(&id, now).await.unwrap());
    assert_eq!(fx.engine.get(&id).await.unwrap().version, version);

    let expired_events = fx
        .notifier
        .events_for(&id)
        .into_iter()
        .filter(|e| e.kind() == "expired")
        .count();
    assert_eq!(expired_events, 1);
}

#[tokio::test]
async fn wrong_actor_leaves_state_unchanged() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;
    approve(&fx, &id, "a").await;
    let before = fx.engine.get(&id).await.unwrap();

    for actor in ["a", "c"] {
        let err = fx
            .engine
            .submit_decision(&id, DecisionRequest::approve(UserId::new(actor)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ApprovalError::NotAuthorized { .. }),
            "{} should not be authorized",
            actor
        );
    }

    assert_eq!(fx.engine.get(&id).await.unwrap(), before);
}

#[tokio::test]
async fn rejection_without_comments_changes_nothing() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;
    let before = fx.engine.get(&id).await.unwrap();

    let err = fx
        .engine
        .submit_decision(&id, DecisionRequest::reject(UserId::new("a"), "   "))
        .await
        .unwrap_err();
    assert_eq!(err, ApprovalError::MissingComments);
    assert_eq!(fx.engine.get(&id).await.unwrap(), before);
}

#[tokio::test]
async fn retried_decision_is_duplicate() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;

    let request = DecisionRequest::approve(UserId::new("a")).at_level(0);
    fx.engine
        .submit_decision(&id, request.clone())
        .await
        .unwrap();

    let err = fx.engine.submit_decision(&id, request).await.unwrap_err();
    assert_eq!(
        err,
        ApprovalError::DuplicateDecision {
            actor: UserId::new("a"),
            level: 0
        }
    );
    assert_eq!(fx.engine.history(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retried_final_decision_is_duplicate() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;
    approve(&fx, &id, "a").await;
    approve(&fx, &id, "b").await;

    let last = DecisionRequest::approve(UserId::new("c")).at_level(2);
    let inst = fx.engine.submit_decision(&id, last.clone()).await.unwrap();
    assert_eq!(inst.state, WorkflowState::Approved);

    let err = fx.engine.submit_decision(&id, last).await.unwrap_err();
    assert_eq!(
        err,
        ApprovalError::DuplicateDecision {
            actor: UserId::new("c"),
            level: 2
        }
    );
    assert_eq!(fx.engine.get(&id).await.unwrap(), inst);
}

#[tokio::test]
async fn cancel_by_requester_only() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Unanimous).await;

    let err = fx
        .engine
        .cancel(&id, &UserId::new("a"), "not mine")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::NotAuthorized { .. }));

    let inst = fx
        .engine
        .cancel(&id, &UserId::new("req"), "superseded by v2")
        .await
        .unwrap();
    assert_eq!(inst.state, WorkflowState::Cancelled);
    assert_eq!(
        inst.final_outcome.as_ref().and_then(FinalOutcome::reason),
        Some("superseded by v2")
    );

    let err = fx
        .engine
        .cancel(&id, &UserId::new("req"), "again")
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidState { .. }));
}

#[tokio::test]
async fn empty_approver_list_rejected_at_create() {
    let fx = fixture();
    let def = WorkflowDefinition::sequential(DocumentRef::new("doc"), Vec::new(), 3600);
    let err = fx.engine.create(def, UserId::new("req")).await.unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidDefinition(_)));
    assert!(fx.store.is_empty().await);
}

#[tokio::test]
async fn dashboard_reflects_store() {
    let fx = fixture();
    let approved = start(&fx, ApprovalMode::Sequential).await;
    for actor in ["a", "b", "c"] {
        approve(&fx, &approved, actor).await;
    }
    let _open = start(&fx, ApprovalMode::Unanimous).await;

    let snapshot = fx.engine.dashboard().await.unwrap();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.count(WorkflowState::Approved), 1);
    assert_eq!(snapshot.count(WorkflowState::InReview), 1);
    assert_eq!(snapshot.overdue, 0);
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test]
async fn stale_commit_is_rejected() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;

    let stale = fx.store.get(&id).await.unwrap().unwrap();
    approve(&fx, &id, "a").await;

    let err = fx
        .store
        .commit(stale.clone(), stale.version)
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::ConcurrentModification { .. }));
    assert!(err.is_retryable());
    assert_eq!(fx.engine.get(&id).await.unwrap().current_level, 1);
}

#[tokio::test]
async fn concurrent_decisions_on_different_instances() {
    let fx = fixture();
    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(start(&fx, ApprovalMode::Unanimous).await);
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let engine = fx.engine.clone();
        handles.push(tokio::spawn(async move {
            for actor in ["a", "b", "c"] {
                engine
                    .submit_decision(&id, DecisionRequest::approve(UserId::new(actor)))
                    .await?;
            }
            Ok::<_, ApprovalError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in ids {
        assert_eq!(
            fx.engine.get(&id).await.unwrap().state,
            WorkflowState::Approved
        );
    }
}

/// Slips a competing approval in front of the next commit
struct RacingStore {
    inner: Arc<InMemoryInstanceStore>,
    armed: AtomicBool,
}

#[async_trait]
impl InstanceStore for RacingStore {
    async fn insert(&self, instance: WorkflowInstance) -> ApprovalResult<WorkflowInstance> {
        self.inner.insert(instance).await
    }

    async fn get(&self, id: &WorkflowInstanceId) -> ApprovalResult<Option<WorkflowInstance>> {
        self.inner.get(id).await
    }

    async fn commit(
        &self,
        instance: WorkflowInstance,
        expected_version: u64,
    ) -> ApprovalResult<WorkflowInstance> {
        if self.armed.swap(false, Ordering::SeqCst) {
            let mut rival = self
                .inner
                .get(&instance.id)
                .await?
                .ok_or_else(|| ApprovalError::InstanceNotFound(instance.id.clone()))?;
            let version = rival.version;
            let at = rival.level_activated_at.unwrap_or(rival.created_at);
            StateMachine::new().submit_decision(
                &mut rival,
                DecisionRequest::approve(UserId::new("a")),
                at,
            )?;
            self.inner.commit(rival, version).await?;
        }
        self.inner.commit(instance, expected_version).await
    }

    async fn list_by_state(&self, state: WorkflowState) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.inner.list_by_state(state).await
    }

    async fn list(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn sweep_loses_race_then_retries_on_fresh_state() {
    let inner = Arc::new(InMemoryInstanceStore::new());
    let racing = Arc::new(RacingStore {
        inner: inner.clone(),
        armed: AtomicBool::new(false),
    });
    let fx = fixture_with_store(inner, racing.clone());
    let id = start(&fx, ApprovalMode::Sequential).await;

    fx.clock.advance(Duration::hours(80));
    racing.armed.store(true, Ordering::SeqCst);

    let (sweeper, _rx) = ExpirySweeper::new(SweeperConfig::default(), fx.engine.clone());
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.expired, vec![id.clone()]);

    let inst = fx.engine.get(&id).await.unwrap();
    assert_eq!(inst.state, WorkflowState::Expired);
    assert_eq!(inst.decisions.len(), 1, "the winning decision is kept");
    assert_eq!(inst.current_level, 1);
}

#[tokio::test]
async fn decision_after_expiry_loses() {
    let fx = fixture();
    let id = start(&fx, ApprovalMode::Sequential).await;
    fx.clock.advance(Duration::hours(80));

    let (sweeper, _rx) = ExpirySweeper::new(SweeperConfig::default(), fx.engine.clone());
    sweeper.sweep_once().await.unwrap();

    let err = fx
        .engine
        .submit_decision(&id, DecisionRequest::approve(UserId::new("a")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::InvalidState { .. }));
    assert!(fx.engine.history(&id).await.unwrap().is_empty());
}

/// Holds the next two commits until both writers have read the instance
struct GatedStore {
    inner: Arc<InMemoryInstanceStore>,
    gate: Barrier,
    armed: AtomicBool,
}

#[async_trait]
impl InstanceStore for GatedStore {
    async fn insert(&self, instance: WorkflowInstance) -> ApprovalResult<WorkflowInstance> {
        self.inner.insert(instance).await
    }

    async fn get(&self, id: &WorkflowInstanceId) -> ApprovalResult<Option<WorkflowInstance>> {
        self.inner.get(id).await
    }

    async fn commit(
        &self,
        instance: WorkflowInstance,
        expected_version: u64,
    ) -> ApprovalResult<WorkflowInstance> {
        if self.armed.load(Ordering::SeqCst) {
            self.gate.wait().await;
            self.armed.store(false, Ordering::SeqCst);
        }
        self.inner.commit(instance, expected_version).await
    }

    async fn list_by_state(&self, state: WorkflowState) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.inner.list_by_state(state).await
    }

    async fn list(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        self.inner.list().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_decisions_commit_once() {
    let inner = Arc::new(InMemoryInstanceStore::new());
    let gated = Arc::new(GatedStore {
        inner: inner.clone(),
        gate: Barrier::new(2),
        armed: AtomicBool::new(false),
    });
    let fx = fixture_with_store(inner, gated.clone());
    let id = start(&fx, ApprovalMode::Unanimous).await;
    let read_version = fx.engine.get(&id).await.unwrap().version;
    gated.armed.store(true, Ordering::SeqCst);

    let decide = |actor: &'static str| {
        let engine = fx.engine.clone();
        let id = id.clone();
        tokio::spawn(async move {
            engine
                .submit_decision(&id, DecisionRequest::approve(UserId::new(actor)))
                .await
        })
    };
    let (first, second) = (decide("a"), decide("b"));
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().position(|r| r.is_err()).unwrap();
    assert!(matches!(
        results[loser],
        Err(ApprovalError::ConcurrentModification { .. })
    ));

    let stored = fx.engine.get(&id).await.unwrap();
    assert_eq!(stored.decisions.len(), 1);
    assert_eq!(stored.version, read_version + 1);

    let retried = approve(&fx, &id, ["a", "b"][loser]).await;
    assert_eq!(retried.decisions.len(), 2);
    assert_eq!(retried.state, WorkflowState::InReview);
    assert_eq!(retried.version, read_version + 2);
}
