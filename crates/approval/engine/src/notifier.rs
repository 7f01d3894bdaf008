//! Notifier collaborator: tells approvers and requesters about changes
//!
//! The engine emits events after a transition is committed and does not
//! care how (or whether) they are delivered. Delivery failures are
//! logged by the engine and never roll back state.

use approval_types::{DocumentRef, UserId, WorkflowEvent, WorkflowInstanceId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// An event plus the context a notifier needs to address it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: WorkflowEvent,
    pub document_ref: DocumentRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_title: Option<String>,
    pub requester: UserId,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Receives workflow notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let title = notification
            .document_title
            .as_deref()
            .unwrap_or("(untitled)");
        match &notification.event {
            WorkflowEvent::LevelActivated {
                instance_id,
                approver,
                level,
            } => tracing::info!(
                instance_id = %instance_id,
                approver = %approver,
                level,
                document = %title,
                "Approver notified"
            ),
            WorkflowEvent::Finalized {
                instance_id,
                outcome,
            } => tracing::info!(
                instance_id = %instance_id,
                requester = %notification.requester,
                outcome = %outcome,
                document = %title,
                "Requester notified of outcome"
            ),
            WorkflowEvent::Expired { instance_id } => tracing::info!(
                instance_id = %instance_id,
                requester = %notification.requester,
                document = %title,
                "Requester notified of expiry"
            ),
        }
        Ok(())
    }
}

/// In-memory notifier for testing; can be told to fail for some instances
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: RwLock<Vec<Notification>>,
    failing: RwLock<HashSet<WorkflowInstanceId>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery for this instance fail
    pub fn fail_for(&self, instance_id: WorkflowInstanceId) {
        self.failing.write().insert(instance_id);
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.read().clone()
    }

    pub fn events_for(&self, instance_id: &WorkflowInstanceId) -> Vec<WorkflowEvent> {
        self.delivered
            .read()
            .iter()
            .filter(|n| n.event.instance_id() == instance_id)
            .map(|n| n.event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.delivered.write().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self
            .failing
            .read()
            .contains(notification.event.instance_id())
        {
            return Err(NotifyError::Delivery(format!(
                "{} notification for {} bounced",
                notification.event.kind(),
                notification.event.instance_id()
            )));
        }
        self.delivered.write().push(notification.clone());
        Ok(())
    }
}
