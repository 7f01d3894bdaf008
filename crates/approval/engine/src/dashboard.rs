//! Read-only aggregate view over workflow instances

use approval_types::{Priority, WorkflowInstance, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time counts for a monitoring surface
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub total: usize,
    pub by_state: BTreeMap<WorkflowState, usize>,
    /// Open (non-terminal) instances per priority
    pub open_by_priority: BTreeMap<Priority, usize>,
    /// In review and past the due date but not yet swept
    pub overdue: usize,
    /// Mean response latency over every recorded decision
    pub average_latency_ms: Option<i64>,
    pub taken_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn from_instances(instances: &[WorkflowInstance], now: DateTime<Utc>) -> Self {
        let mut snapshot = Self {
            total: instances.len(),
            taken_at: now,
            ..Self::default()
        };
        for state in WorkflowState::ALL {
            snapshot.by_state.insert(state, 0);
        }

        let mut latency_sum: i64 = 0;
        let mut latency_count: i64 = 0;

        for instance in instances {
            *snapshot.by_state.entry(instance.state).or_default() += 1;
            if !instance.is_terminal() {
                *snapshot
                    .open_by_priority
                    .entry(instance.definition.priority)
                    .or_default() += 1;
            }
            if instance.is_overdue(now) {
                snapshot.overdue += 1;
            }
            for decision in &instance.decisions {
                latency_sum += decision.response_latency_ms;
                latency_count += 1;
            }
        }

        if latency_count > 0 {
            snapshot.average_latency_ms = Some(latency_sum / latency_count);
        }
        snapshot
    }

    pub fn count(&self, state: WorkflowState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// Instances that reached a terminal state
    pub fn closed(&self) -> usize {
        self.by_state
            .iter()
            .filter(|(state, _)| state.is_terminal())
            .map(|(_, n)| n)
            .sum()
    }
}
