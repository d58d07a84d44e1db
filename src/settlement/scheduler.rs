//! Daily settlement scheduler.
//!
//! Runs once per day at a configured UTC hour, collapsing every due
//! scheduled task into per-merchant, per-day settlement reports. The
//! database pass itself lives behind [`SettlementRunner`] so the loop can
//! be exercised without Postgres.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use crate::error::AppResult;
use crate::ledger::models::{DisbursementRecord, SettlementReport};

/// One settlement pass over everything due on or before `as_of`, executed
/// atomically: report upserts, record settlement flags, and task completion
/// all commit together or not at all.
#[async_trait]
pub trait SettlementRunner: Send + Sync {
    async fn run_settlement(&self, as_of: NaiveDate) -> AppResult<Vec<SettlementReport>>;
}

/// Per-merchant aggregate of one settlement pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantAggregate {
    pub merchant_id: i64,
    pub transaction_count: i64,
    pub transaction_amount: Decimal,
    pub commission: Decimal,
    pub gst: Decimal,
    pub withholding_tax: Decimal,
    pub merchant_amount: Decimal,
}

/// Collapse due completed records into one aggregate per merchant, ordered
/// by merchant id.
pub fn aggregate_by_merchant(records: &[DisbursementRecord]) -> Vec<MerchantAggregate> {
    let mut per_merchant: BTreeMap<i64, MerchantAggregate> = BTreeMap::new();
    for record in records {
        let entry = per_merchant
            .entry(record.merchant_id)
            .or_insert_with(|| MerchantAggregate {
                merchant_id: record.merchant_id,
                transaction_count: 0,
                transaction_amount: Decimal::ZERO,
                commission: Decimal::ZERO,
                gst: Decimal::ZERO,
                withholding_tax: Decimal::ZERO,
                merchant_amount: Decimal::ZERO,
            });
        entry.transaction_count += 1;
        entry.transaction_amount += record.payout_amount;
        entry.commission += record.commission;
        entry.gst += record.gst;
        entry.withholding_tax += record.withholding_tax;
        entry.merchant_amount += record.merchant_amount;
    }
    per_merchant.into_values().collect()
}

pub struct SettlementScheduler {
    runner: Arc<dyn SettlementRunner>,
    execution_hour: u32,
}

impl SettlementScheduler {
    pub fn new(runner: Arc<dyn SettlementRunner>, execution_hour: u32) -> Self {
        Self {
            runner,
            execution_hour: execution_hour.min(23),
        }
    }

    /// Start the daily loop in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = Self::calculate_next_daily_execution(now, self.execution_hour);
                let wait = next.signed_duration_since(now);
                if wait.num_seconds() > 0 {
                    info!(
                        "next settlement run scheduled for {} UTC",
                        next.format("%Y-%m-%d %H:%M:%S")
                    );
                    tokio::time::sleep(Duration::from_secs(wait.num_seconds() as u64)).await;
                }

                match self.runner.run_settlement(Utc::now().date_naive()).await {
                    Ok(reports) => {
                        info!(merchants = reports.len(), "settlement run completed");
                    }
                    Err(e) => {
                        // Tasks stay due; the next run picks them up.
                        error!("settlement run failed: {}", e);
                    }
                }
            }
        })
    }

    /// Next occurrence of the configured hour, today or tomorrow.
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let today = now
            .date_naive()
            .and_hms_opt(execution_hour, 0, 0)
            .unwrap();
        let today_dt = Utc.from_utc_datetime(&today);

        if today_dt <= now {
            let tomorrow = (now.date_naive() + chrono::Duration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap();
            Utc.from_utc_datetime(&tomorrow)
        } else {
            today_dt
        }
    }
}
