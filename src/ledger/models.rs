use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Disbursement record status. Transitions are one-way except
/// pending -> {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "disbursement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisbursementStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisbursementStatus::Pending => "pending",
            DisbursementStatus::Completed => "completed",
            DisbursementStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outbound payment variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "disbursement_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisbursementKind {
    Disbursement,
    Refund,
}

impl DisbursementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementKind::Disbursement => "disbursement",
            DisbursementKind::Refund => "refund",
        }
    }
}

/// Merchant entity. `balance_to_disburse` is written only by the
/// reservation/compensation paths in the ledger repository.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Merchant {
    pub id: i64,
    pub uid: Uuid,
    pub name: String,
    pub disbursement_account: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_to_disburse: Decimal,
    pub callback_url: Option<String>,
    pub second_callback_url: Option<String>,
    pub encrypted_callbacks: bool,
    pub provider: String,
    pub provider_base_url: String,
    pub provider_token: String,
    pub provider_key: String,
    pub provider_iv: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    pub fn has_disbursement_account(&self) -> bool {
        self.disbursement_account
            .as_deref()
            .map(|a| !a.is_empty())
            .unwrap_or(false)
    }

    /// Callback URLs in delivery order (single or double callback mode).
    pub fn callback_urls(&self) -> Vec<&str> {
        self.callback_url
            .iter()
            .chain(self.second_callback_url.iter())
            .map(|s| s.as_str())
            .collect()
    }
}

/// Per-merchant financial terms, read-only to this engine
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FinancialTerms {
    pub merchant_id: i64,
    pub commission_rate: Decimal,
    pub gst_rate: Decimal,
    pub wht_rate: Decimal,
    pub settlement_duration_days: i32,
}

/// Disbursement record - one row per disbursement or refund attempt
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DisbursementRecord {
    pub id: i64,
    pub merchant_id: i64,
    pub merchant_custom_order_id: String,
    pub system_order_id: String,
    pub provider: String,
    pub destination: String,
    pub kind: DisbursementKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub requested_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub commission: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub gst: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withholding_tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub merchant_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub payout_amount: Decimal,
    pub status: DisbursementStatus,
    pub response_message: Option<String>,
    pub provider_txn_id: Option<String>,
    /// Whether the merchant balance currently holds a reservation for this
    /// record. The sweeper consults this so a retry never double-reserves.
    pub funds_reserved: bool,
    pub callback_sent: bool,
    pub settled: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DisbursementRecord {
    /// Provider-visible reference for audit trails: the provider's txn id
    /// when one was obtained, otherwise our own order id.
    pub fn provider_reference(&self) -> &str {
        self.provider_txn_id
            .as_deref()
            .unwrap_or(&self.system_order_id)
    }
}

/// Insert payload for a new disbursement record
#[derive(Debug, Clone)]
pub struct NewDisbursement {
    pub merchant_id: i64,
    pub merchant_custom_order_id: String,
    pub system_order_id: String,
    pub provider: String,
    pub destination: String,
    pub kind: DisbursementKind,
    pub requested_amount: Decimal,
    pub commission: Decimal,
    pub gst: Decimal,
    pub withholding_tax: Decimal,
    pub merchant_amount: Decimal,
    pub payout_amount: Decimal,
    pub status: DisbursementStatus,
    pub response_message: Option<String>,
    pub provider_txn_id: Option<String>,
    pub funds_reserved: bool,
}

/// Per merchant, per calendar day settlement aggregate.
/// Create-or-increment only, never decremented.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettlementReport {
    pub id: i64,
    pub merchant_id: i64,
    pub report_date: NaiveDate,
    pub transaction_count: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub commission: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub gst: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withholding_tax: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub merchant_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merchant() -> Merchant {
        Merchant {
            id: 1,
            uid: Uuid::new_v4(),
            name: "Acme".to_string(),
            disbursement_account: Some("ACC-1".to_string()),
            balance_to_disburse: Decimal::new(5000, 0),
            callback_url: Some("https://acme.example/cb".to_string()),
            second_callback_url: None,
            encrypted_callbacks: false,
            provider: "walletpay".to_string(),
            provider_base_url: "https://provider.example".to_string(),
            provider_token: "token".to_string(),
            provider_key: "00".repeat(32),
            provider_iv: "00".repeat(16),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn callback_urls_single_and_double_mode() {
        let mut m = merchant();
        assert_eq!(m.callback_urls(), vec!["https://acme.example/cb"]);

        m.second_callback_url = Some("https://acme.example/cb2".to_string());
        assert_eq!(m.callback_urls().len(), 2);

        m.callback_url = None;
        m.second_callback_url = None;
        assert!(m.callback_urls().is_empty());
    }

    #[test]
    fn disbursement_account_check() {
        let mut m = merchant();
        assert!(m.has_disbursement_account());
        m.disbursement_account = Some(String::new());
        assert!(!m.has_disbursement_account());
        m.disbursement_account = None;
        assert!(!m.has_disbursement_account());
    }
}
