//! Decision ledger: read-only projections over an instance's decisions
//!
//! The state machine is the only writer of decisions. The ledger never
//! mutates anything; it reconstructs history and computes statistics
//! from what was recorded.

use approval_types::{Decision, DecisionAction, UserId, WorkflowInstance};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Projection over the decisions of one instance
#[derive(Clone, Copy, Debug)]
pub struct DecisionLedger<'a> {
    decisions: &'a [Decision],
}

impl<'a> DecisionLedger<'a> {
    pub fn new(instance: &'a WorkflowInstance) -> Self {
        Self {
            decisions: &instance.decisions,
        }
    }

    /// Decisions in the order they were recorded.
    ///
    /// The iterator is finite and can be restarted by calling this again.
    pub fn history(&self) -> impl Iterator<Item = &'a Decision> + 'a {
        self.decisions.iter()
    }

    /// Mean response latency, zero when nothing has been decided
    pub fn average_response_latency(&self) -> Duration {
        if self.decisions.is_empty() {
            return Duration::zero();
        }
        let total: i64 = self
            .decisions
            .iter()
            .map(|d| d.response_latency_ms)
            .sum();
        Duration::milliseconds(total / self.decisions.len() as i64)
    }

    /// Decisions made by a given actor
    pub fn by_actor(&self, actor: &UserId) -> Vec<&'a Decision> {
        self.decisions.iter().filter(|d| &d.actor == actor).collect()
    }

    pub fn last(&self) -> Option<&'a Decision> {
        self.decisions.last()
    }

    pub fn statistics(&self) -> LedgerStatistics {
        let approvals = self
            .decisions
            .iter()
            .filter(|d| d.action == DecisionAction::Approved)
            .count();
        let latencies = self.decisions.iter().map(|d| d.response_latency_ms);

        LedgerStatistics {
            total: self.decisions.len(),
            approvals,
            rejections: self.decisions.len() - approvals,
            average_latency_ms: self.average_response_latency().num_milliseconds(),
            fastest_latency_ms: latencies.clone().min(),
            slowest_latency_ms: latencies.max(),
            latency_by_level: self
                .decisions
                .iter()
                .map(|d| (d.level, d.response_latency_ms))
                .collect(),
        }
    }
}

/// Summary numbers for one instance's decisions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total: usize,
    pub approvals: usize,
    pub rejections: usize,
    pub average_latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_latency_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slowest_latency_ms: Option<i64>,
    /// Response latency of the decision recorded for each level
    #[serde(default)]
    pub latency_by_level: BTreeMap<usize, i64>,
}
