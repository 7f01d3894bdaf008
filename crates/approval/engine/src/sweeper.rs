//! Expiry sweeper: periodically expires overdue instances

use crate::{ApprovalEngine, SweeperConfig};
use approval_types::{ApprovalError, ApprovalResult, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// What a single sweep did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// In-review instances examined
    pub scanned: usize,
    pub expired: Vec<WorkflowInstanceId>,
    /// Attempts repeated after a concurrent modification
    pub retried: usize,
    /// Instances left untouched because of an error
    pub failed: usize,
}

/// Background expiry of overdue instances
pub struct ExpirySweeper {
    config: SweeperConfig,
    engine: Arc<ApprovalEngine>,
    sweep_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl ExpirySweeper {
    pub fn new(
        config: SweeperConfig,
        engine: Arc<ApprovalEngine>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (sweep_tx, sweep_rx) = mpsc::channel(10);

        let sweeper = Arc::new(Self {
            config,
            engine,
            sweep_tx,
            running: Arc::new(RwLock::new(false)),
        });

        (sweeper, sweep_rx)
    }

    /// Request a sweep outside the regular interval
    pub async fn trigger_sweep(&self) {
        let _ = self.sweep_tx.send(()).await;
    }

    /// Run until `stop` is called or the trigger channel closes
    pub async fn start(self: Arc<Self>, mut sweep_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.interval().as_secs(),
            "Expiry sweeper started"
        );

        let mut interval = interval(self.config.interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Expiry sweep failed");
                    }
                }
                Some(_) = sweep_rx.recv() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Triggered expiry sweep failed");
                    }
                }
                else => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Sweep at the engine's current time
    pub async fn sweep_once(&self) -> ApprovalResult<SweepReport> {
        self.sweep_at(self.engine.now()).await
    }

    /// Expire every in-review instance overdue at `now`.
    ///
    /// Only the listing can fail the sweep. Per-instance errors are
    /// counted and logged so one bad instance does not block the rest.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> ApprovalResult<SweepReport> {
        let candidates = self.engine.in_review().await?;
        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };

        for instance in candidates.into_iter().filter(|i| i.is_overdue(now)) {
            let mut attempt = 0;
            loop {
                match self.engine.expire_if_overdue(&instance.id, now).await {
                    Ok(true) => {
                        report.expired.push(instance.id.clone());
                        break;
                    }
                    Ok(false) => break,
                    Err(ApprovalError::ConcurrentModification { .. })
                        if attempt < self.config.max_conflict_retries =>
                    {
                        attempt += 1;
                        report.retried += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            instance_id = %instance.id,
                            error = %e,
                            "Could not expire instance"
                        );
                        report.failed += 1;
                        break;
                    }
                }
            }
        }

        if !report.expired.is_empty() || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                expired = report.expired.len(),
                failed = report.failed,
                "Expiry sweep complete"
            );
        }
        Ok(report)
    }
}
