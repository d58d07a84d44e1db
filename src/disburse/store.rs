use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::{DisbursementRecord, FinancialTerms, Merchant, NewDisbursement};

/// Persistence seam for the reconciler and sweeper. The Postgres ledger
/// repository implements this in production; tests inject an in-memory fake.
#[async_trait]
pub trait DisbursementStore: Send + Sync {
    async fn find_merchant_by_uid(&self, uid: Uuid) -> AppResult<Option<Merchant>>;

    async fn find_merchant(&self, merchant_id: i64) -> AppResult<Option<Merchant>>;

    async fn financial_terms(&self, merchant_id: i64) -> AppResult<Option<FinancialTerms>>;

    /// Non-deleted record with this caller order id, if any.
    async fn find_active_order(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> AppResult<Option<DisbursementRecord>>;

    /// Atomically deduct from the merchant's disbursable balance.
    /// `InsufficientBalance` and `RetryableConflict` leave no side effect.
    async fn reserve(&self, merchant_id: i64, amount: Decimal) -> AppResult<()>;

    /// Credit a reservation back. Safe to call from exception paths.
    async fn compensate(&self, merchant_id: i64, amount: Decimal) -> AppResult<()>;

    /// Persist an outcome record. When `settlement_due` is given (completed
    /// outcomes) the scheduled task is created in the same transaction.
    /// A uniqueness race on the caller order id surfaces as `DuplicateOrder`.
    async fn persist_outcome(
        &self,
        record: NewDisbursement,
        settlement_due: Option<NaiveDate>,
    ) -> AppResult<DisbursementRecord>;

    /// Oldest pending records, bounded, for the retry sweeper.
    async fn pending_batch(&self, limit: i64) -> AppResult<Vec<DisbursementRecord>>;

    async fn set_funds_reserved(&self, record_id: i64, reserved: bool) -> AppResult<()>;

    /// pending -> completed, plus the settlement task, in one transaction.
    async fn complete_record(
        &self,
        record_id: i64,
        provider_txn_id: Option<&str>,
        message: &str,
        settlement_due: NaiveDate,
    ) -> AppResult<()>;

    /// pending -> failed.
    async fn fail_record(
        &self,
        record_id: i64,
        provider_txn_id: Option<&str>,
        message: &str,
    ) -> AppResult<()>;

    async fn mark_callback_sent(&self, record_id: i64) -> AppResult<()>;
}
