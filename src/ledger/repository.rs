use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::disburse::store::DisbursementStore;
use crate::error::{AppError, AppResult, DisburseError};
use crate::settlement::scheduler::{aggregate_by_merchant, SettlementRunner};

use super::models::{
    DisbursementRecord, FinancialTerms, Merchant, NewDisbursement, SettlementReport,
};

const MERCHANT_COLUMNS: &str = "id, uid, name, disbursement_account, balance_to_disburse, \
     callback_url, second_callback_url, encrypted_callbacks, provider, provider_base_url, \
     provider_token, provider_key, provider_iv, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, merchant_id, merchant_custom_order_id, system_order_id, \
     provider, destination, kind, requested_amount, commission, gst, withholding_tax, \
     merchant_amount, payout_amount, status, response_message, provider_txn_id, \
     funds_reserved, callback_sent, settled, deleted_at, created_at, updated_at";

/// Ledger repository - the source of truth for all persistent state.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Translate Postgres concurrency and uniqueness failures into the domain
/// error taxonomy. Serialization failures and deadlocks are safe to resubmit;
/// the partial unique index on (merchant_id, merchant_custom_order_id)
/// surfaces as a duplicate order.
fn map_db_error(error: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &error {
        match db.code().as_deref() {
            Some("40001") | Some("40P01") => {
                return DisburseError::RetryableConflict.into();
            }
            Some("23505") => {
                let what = db.constraint().unwrap_or("order id").to_string();
                return DisburseError::DuplicateOrder(what).into();
            }
            _ => {}
        }
    }
    AppError::Database(error)
}

#[async_trait]
impl DisbursementStore for LedgerRepository {
    async fn find_merchant_by_uid(&self, uid: Uuid) -> AppResult<Option<Merchant>> {
        let merchant = sqlx::query_as::<_, Merchant>(&format!(
            "SELECT {} FROM merchants WHERE uid = $1",
            MERCHANT_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(merchant)
    }

    async fn find_merchant(&self, merchant_id: i64) -> AppResult<Option<Merchant>> {
        let merchant = sqlx::query_as::<_, Merchant>(&format!(
            "SELECT {} FROM merchants WHERE id = $1",
            MERCHANT_COLUMNS
        ))
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(merchant)
    }

    async fn financial_terms(&self, merchant_id: i64) -> AppResult<Option<FinancialTerms>> {
        let terms = sqlx::query_as::<_, FinancialTerms>(
            r#"
            SELECT merchant_id, commission_rate, gst_rate, wht_rate, settlement_duration_days
            FROM financial_terms
            WHERE merchant_id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(terms)
    }

    async fn find_active_order(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> AppResult<Option<DisbursementRecord>> {
        let record = sqlx::query_as::<_, DisbursementRecord>(&format!(
            "SELECT {} FROM disbursement_records \
             WHERE merchant_id = $1 AND merchant_custom_order_id = $2 AND deleted_at IS NULL",
            RECORD_COLUMNS
        ))
        .bind(merchant_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn reserve(&self, merchant_id: i64, amount: Decimal) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        // Conditional debit: zero rows affected means the balance cannot
        // cover the reservation. The CHECK constraint backstops races.
        let result = sqlx::query(
            r#"
            UPDATE merchants
            SET balance_to_disburse = balance_to_disburse - $2, updated_at = NOW()
            WHERE id = $1 AND balance_to_disburse >= $2
            "#,
        )
        .bind(merchant_id)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            let available: Option<Decimal> =
                sqlx::query_scalar("SELECT balance_to_disburse FROM merchants WHERE id = $1")
                    .bind(merchant_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(DisburseError::InsufficientBalance {
                required: amount.to_string(),
                available: available
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "0".to_string()),
            }
            .into());
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    async fn compensate(&self, merchant_id: i64, amount: Decimal) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE merchants
            SET balance_to_disburse = balance_to_disburse + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(merchant_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn persist_outcome(
        &self,
        record: NewDisbursement,
        settlement_due: Option<NaiveDate>,
    ) -> AppResult<DisbursementRecord> {
        let mut tx = self.pool.begin().await?;

        let order_id = record.merchant_custom_order_id.clone();
        let row = sqlx::query_as::<_, DisbursementRecord>(&format!(
            r#"
            INSERT INTO disbursement_records
                (merchant_id, merchant_custom_order_id, system_order_id, provider,
                 destination, kind, requested_amount, commission, gst, withholding_tax,
                 merchant_amount, payout_amount, status, response_message,
                 provider_txn_id, funds_reserved)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.merchant_id)
        .bind(&record.merchant_custom_order_id)
        .bind(&record.system_order_id)
        .bind(&record.provider)
        .bind(&record.destination)
        .bind(record.kind)
        .bind(record.requested_amount)
        .bind(record.commission)
        .bind(record.gst)
        .bind(record.withholding_tax)
        .bind(record.merchant_amount)
        .bind(record.payout_amount)
        .bind(record.status)
        .bind(&record.response_message)
        .bind(&record.provider_txn_id)
        .bind(record.funds_reserved)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match map_db_error(e) {
            AppError::Disburse(DisburseError::DuplicateOrder(_)) => {
                DisburseError::DuplicateOrder(order_id.clone()).into()
            }
            other => other,
        })?;

        if let Some(due) = settlement_due {
            sqlx::query(
                r#"
                INSERT INTO scheduled_tasks (record_id, merchant_id, scheduled_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(row.id)
            .bind(row.merchant_id)
            .bind(due)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(row)
    }

    async fn pending_batch(&self, limit: i64) -> AppResult<Vec<DisbursementRecord>> {
        let records = sqlx::query_as::<_, DisbursementRecord>(&format!(
            "SELECT {} FROM disbursement_records \
             WHERE status = 'pending' AND deleted_at IS NULL \
             ORDER BY created_at ASC \
             LIMIT $1",
            RECORD_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_funds_reserved(&self, record_id: i64, reserved: bool) -> AppResult<()> {
        sqlx::query(
            "UPDATE disbursement_records SET funds_reserved = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(record_id)
        .bind(reserved)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_record(
        &self,
        record_id: i64,
        provider_txn_id: Option<&str>,
        message: &str,
        settlement_due: NaiveDate,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let merchant_id: i64 = sqlx::query_scalar(
            r#"
            UPDATE disbursement_records
            SET status = 'completed',
                provider_txn_id = COALESCE($2, provider_txn_id),
                response_message = $3,
                funds_reserved = TRUE,
                updated_at = NOW()
            WHERE id = $1
            RETURNING merchant_id
            "#,
        )
        .bind(record_id)
        .bind(provider_txn_id)
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO scheduled_tasks (record_id, merchant_id, scheduled_at) VALUES ($1, $2, $3)",
        )
        .bind(record_id)
        .bind(merchant_id)
        .bind(settlement_due)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    async fn fail_record(
        &self,
        record_id: i64,
        provider_txn_id: Option<&str>,
        message: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE disbursement_records
            SET status = 'failed',
                provider_txn_id = COALESCE($2, provider_txn_id),
                response_message = $3,
                funds_reserved = FALSE,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(provider_txn_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_callback_sent(&self, record_id: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE disbursement_records SET callback_sent = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SettlementRunner for LedgerRepository {
    /// One atomic settlement pass: collect everything due, aggregate per
    /// merchant, create-or-increment the day's reports, and mark records
    /// settled and tasks completed. A serialization failure rolls the whole
    /// pass back; the tasks stay due for the next run.
    async fn run_settlement(&self, as_of: NaiveDate) -> AppResult<Vec<SettlementReport>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let due = sqlx::query_as::<_, DisbursementRecord>(
            r#"
            SELECT r.id, r.merchant_id, r.merchant_custom_order_id, r.system_order_id,
                   r.provider, r.destination, r.kind, r.requested_amount, r.commission,
                   r.gst, r.withholding_tax, r.merchant_amount, r.payout_amount, r.status,
                   r.response_message, r.provider_txn_id, r.funds_reserved, r.callback_sent,
                   r.settled, r.deleted_at, r.created_at, r.updated_at
            FROM disbursement_records r
            JOIN scheduled_tasks t ON t.record_id = r.id
            WHERE t.status = 'pending'
              AND t.scheduled_at <= $1
              AND r.status = 'completed'
              AND r.settled = FALSE
              AND r.deleted_at IS NULL
            FOR UPDATE OF r
            "#,
        )
        .bind(as_of)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_error)?;

        if due.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        // Merchants with no financial terms are skipped; their tasks stay
        // due until terms are configured.
        let merchant_ids: Vec<i64> = due.iter().map(|r| r.merchant_id).collect();
        let with_terms: HashSet<i64> =
            sqlx::query_scalar("SELECT merchant_id FROM financial_terms WHERE merchant_id = ANY($1)")
                .bind(&merchant_ids)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let (settleable, skipped): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|r| with_terms.contains(&r.merchant_id));
        for record in &skipped {
            warn!(
                merchant_id = record.merchant_id,
                record_id = record.id,
                "merchant has no financial terms, settlement deferred"
            );
        }

        let mut reports = Vec::new();
        for aggregate in aggregate_by_merchant(&settleable) {
            let report = sqlx::query_as::<_, SettlementReport>(
                r#"
                INSERT INTO settlement_reports
                    (merchant_id, report_date, transaction_count, transaction_amount,
                     commission, gst, withholding_tax, merchant_amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (merchant_id, report_date) DO UPDATE SET
                    transaction_count = settlement_reports.transaction_count + EXCLUDED.transaction_count,
                    transaction_amount = settlement_reports.transaction_amount + EXCLUDED.transaction_amount,
                    commission = settlement_reports.commission + EXCLUDED.commission,
                    gst = settlement_reports.gst + EXCLUDED.gst,
                    withholding_tax = settlement_reports.withholding_tax + EXCLUDED.withholding_tax,
                    merchant_amount = settlement_reports.merchant_amount + EXCLUDED.merchant_amount,
                    updated_at = NOW()
                RETURNING id, merchant_id, report_date, transaction_count, transaction_amount,
                          commission, gst, withholding_tax, merchant_amount, created_at, updated_at
                "#,
            )
            .bind(aggregate.merchant_id)
            .bind(as_of)
            .bind(aggregate.transaction_count)
            .bind(aggregate.transaction_amount)
            .bind(aggregate.commission)
            .bind(aggregate.gst)
            .bind(aggregate.withholding_tax)
            .bind(aggregate.merchant_amount)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;
            reports.push(report);
        }

        let settled_ids: Vec<i64> = settleable.iter().map(|r| r.id).collect();
        sqlx::query(
            "UPDATE disbursement_records SET settled = TRUE, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&settled_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET status = 'completed', executed_at = NOW()
            WHERE record_id = ANY($1) AND status = 'pending'
            "#,
        )
        .bind(&settled_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(map_db_error)?;
        Ok(reports)
    }
}
