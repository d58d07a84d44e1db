//! Background sweep over pending disbursements.
//!
//! Runs single-flight on a fixed interval: each tick pulls a bounded batch
//! of pending records and re-drives them through the reconciler. A record
//! that stays inconclusive simply waits for the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::AppResult;
use crate::ledger::models::DisbursementStatus;

use super::reconciler::Reconciler;
use super::store::DisbursementStore;

pub struct PendingSweeper {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn DisbursementStore>,
    interval: Duration,
    batch_size: i64,
}

impl PendingSweeper {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn DisbursementStore>,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            reconciler,
            store,
            interval,
            batch_size,
        }
    }

    /// Spawn the sweep loop. Awaiting each run before sleeping keeps the
    /// sweeps single-flight: a slow batch delays the next tick instead of
    /// overlapping it.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                batch_size = self.batch_size,
                "pending sweeper started"
            );
            loop {
                tokio::time::sleep(self.interval).await;
                if let Err(e) = self.run_once().await {
                    error!("pending sweep failed: {}", e);
                }
            }
        })
    }

    /// One sweep pass. Individual record failures are logged and do not
    /// abort the batch.
    pub async fn run_once(&self) -> AppResult<SweepSummary> {
        let batch = self.store.pending_batch(self.batch_size).await?;
        let mut summary = SweepSummary::default();

        for record in &batch {
            match self.reconciler.redrive(record).await {
                Ok(DisbursementStatus::Completed) => summary.completed += 1,
                Ok(DisbursementStatus::Failed) => summary.failed += 1,
                Ok(DisbursementStatus::Pending) => summary.still_pending += 1,
                Err(e) => {
                    summary.errors += 1;
                    error!(
                        record_id = record.id,
                        order_id = %record.system_order_id,
                        "redrive error: {}", e
                    );
                }
            }
        }

        if !batch.is_empty() {
            info!(
                scanned = batch.len(),
                completed = summary.completed,
                failed = summary.failed,
                still_pending = summary.still_pending,
                errors = summary.errors,
                "pending sweep finished"
            );
        }
        Ok(summary)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub completed: u32,
    pub failed: u32,
    pub still_pending: u32,
    pub errors: u32,
}
