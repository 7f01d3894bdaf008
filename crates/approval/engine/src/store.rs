//! Instance storage with optimistic version checks
//!
//! Every committed write bumps the instance version. Writers hand back
//! the version they read; a store that has moved on rejects the write
//! with `ConcurrentModification` and keeps its last committed state.

use approval_types::{
    ApprovalError, ApprovalResult, WorkflowInstance, WorkflowInstanceId, WorkflowState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence for workflow instances (decisions are embedded)
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Store a new instance; the stored copy starts at version 1
    async fn insert(&self, instance: WorkflowInstance) -> ApprovalResult<WorkflowInstance>;

    /// Get an instance by ID
    async fn get(&self, id: &WorkflowInstanceId) -> ApprovalResult<Option<WorkflowInstance>>;

    /// Replace an instance if its stored version still equals `expected_version`.
    ///
    /// Returns the committed copy with its new version.
    async fn commit(
        &self,
        instance: WorkflowInstance,
        expected_version: u64,
    ) -> ApprovalResult<WorkflowInstance>;

    /// List instances in a given state
    async fn list_by_state(&self, state: WorkflowState) -> ApprovalResult<Vec<WorkflowInstance>>;

    /// List all instances
    async fn list(&self) -> ApprovalResult<Vec<WorkflowInstance>>;
}

/// In-memory storage for development and testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryInstanceStore {
    instances: Arc<RwLock<HashMap<WorkflowInstanceId, WorkflowInstance>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn insert(&self, mut instance: WorkflowInstance) -> ApprovalResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(ApprovalError::DuplicateInstance(instance.id));
        }
        instance.version = 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn get(&self, id: &WorkflowInstanceId) -> ApprovalResult<Option<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).cloned())
    }

    async fn commit(
        &self,
        mut instance: WorkflowInstance,
        expected_version: u64,
    ) -> ApprovalResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&instance.id)
            .ok_or_else(|| ApprovalError::InstanceNotFound(instance.id.clone()))?;

        if stored.version != expected_version {
            return Err(ApprovalError::ConcurrentModification {
                instance_id: instance.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        instance.version = expected_version + 1;
        *stored = instance.clone();
        Ok(instance)
    }

    async fn list_by_state(&self, state: WorkflowState) -> ApprovalResult<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.state == state)
            .cloned()
            .collect())
    }

    async fn list(&self) -> ApprovalResult<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.values().cloned().collect())
    }
}
