//! Merchant webhook delivery.
//!
//! Deliberately decoupled from the request path: a terminal disbursement
//! outcome enqueues a delayed, fire-and-forget delivery task with bounded
//! retries. Failures are logged and never roll back the disbursement.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::spawn;
use tracing::{error, info, warn};

use crate::disburse::store::DisbursementStore;
use crate::error::AppResult;
use crate::idgen::Clock;
use crate::ledger::models::{DisbursementRecord, Merchant};
use crate::provider::cipher::PayloadCipher;
use crate::provider::traits::ProviderCredentials;

/// Seam between the reconciler and callback delivery, so the state machine
/// tests can observe which records were handed over for notification.
pub trait Notifier: Send + Sync {
    fn enqueue(&self, merchant: &Merchant, record: &DisbursementRecord);
}

/// Payload POSTed to the merchant's callback URL(s). Delivery succeeds when
/// the response body is the literal string "success".
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: rust_decimal::Decimal,
    pub msisdn: String,
    pub time: i64,
    pub order_id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    cipher: Arc<dyn PayloadCipher>,
    store: Arc<dyn DisbursementStore>,
    clock: Arc<dyn Clock>,
    delay: Duration,
    max_attempts: u32,
}

impl WebhookNotifier {
    pub fn new(
        store: Arc<dyn DisbursementStore>,
        cipher: Arc<dyn PayloadCipher>,
        clock: Arc<dyn Clock>,
        delay: Duration,
        max_attempts: u32,
    ) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            cipher,
            store,
            clock,
            delay,
            max_attempts,
        })
    }

    fn payload_for(&self, record: &DisbursementRecord) -> CallbackPayload {
        CallbackPayload {
            amount: record.payout_amount,
            msisdn: record.destination.clone(),
            time: self.clock.now().timestamp(),
            order_id: record.merchant_custom_order_id.clone(),
            status: record.status.to_string(),
            kind: record.kind.as_str().to_string(),
        }
    }

    fn build_body(&self, merchant: &Merchant, payload: &CallbackPayload) -> AppResult<serde_json::Value> {
        if !merchant.encrypted_callbacks {
            return Ok(serde_json::to_value(payload)?);
        }
        let credentials = ProviderCredentials::from_merchant(merchant)?;
        let plaintext = serde_json::to_vec(payload)?;
        let ciphertext = self
            .cipher
            .encrypt(&plaintext, &credentials.key, &credentials.iv)?;
        Ok(json!({ "encryptedData": ciphertext }))
    }
}

impl Notifier for WebhookNotifier {
    /// Enqueue delivery for a terminal record. Returns immediately; the
    /// caller's response is never blocked on merchant connectivity.
    fn enqueue(&self, merchant: &Merchant, record: &DisbursementRecord) {
        let urls: Vec<String> = merchant.callback_urls().iter().map(|u| u.to_string()).collect();
        if urls.is_empty() {
            return;
        }

        let payload = self.payload_for(record);

        let body = match self.build_body(merchant, &payload) {
            Ok(b) => b,
            Err(e) => {
                error!(merchant_id = merchant.id, order_id = %payload.order_id,
                       "failed to build callback body: {}", e);
                return;
            }
        };

        let http = self.http.clone();
        let store = self.store.clone();
        let delay = self.delay;
        let max_attempts = self.max_attempts;
        let record_id = record.id;
        let order_id = payload.order_id.clone();

        spawn(async move {
            tokio::time::sleep(delay).await;

            let mut all_delivered = true;
            for url in &urls {
                if !deliver_with_retry(&http, url, &body, max_attempts, &order_id).await {
                    all_delivered = false;
                }
            }

            if all_delivered {
                if let Err(e) = store.mark_callback_sent(record_id).await {
                    error!(order_id = %order_id, "failed to record callback delivery: {}", e);
                }
                info!(order_id = %order_id, "callback delivered");
            }
        });
    }
}

async fn deliver_with_retry(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    max_attempts: u32,
    order_id: &str,
) -> bool {
    for attempt in 1..=max_attempts {
        match http.post(url).json(body).send().await {
            Ok(response) => match response.text().await {
                Ok(text) if text.trim() == "success" => return true,
                Ok(text) => warn!(order_id, url, attempt, "callback not acknowledged: {:?}", text),
                Err(e) => warn!(order_id, url, attempt, "callback response unreadable: {}", e),
            },
            Err(e) => warn!(order_id, url, attempt, "callback delivery failed: {}", e),
        }
        if attempt < max_attempts {
            tokio::time::sleep(Duration::from_secs(2u64.saturating_pow(attempt))).await;
        }
    }
    error!(order_id, url, "callback delivery exhausted after {} attempts", max_attempts);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_payload_wire_shape() {
        let payload = CallbackPayload {
            amount: rust_decimal_macros::dec!(710.0),
            msisdn: "923001234567".to_string(),
            time: 1_700_000_000,
            order_id: "ORD-1".to_string(),
            status: "completed".to_string(),
            kind: "disbursement".to_string(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["msisdn"], "923001234567");
        assert_eq!(value["order_id"], "ORD-1");
        assert_eq!(value["status"], "completed");
        // serde renames `kind` to the wire field name
        assert_eq!(value["type"], "disbursement");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn payload_time_comes_from_the_injected_clock() {
        use crate::disburse::testkit::{fixed_now, FakeStore, FixedClock};
        use crate::ledger::models::{DisbursementKind, DisbursementStatus};
        use crate::provider::cipher::KeystreamCipher;
        use chrono::Utc;
        use rust_decimal_macros::dec;

        let notifier = WebhookNotifier::new(
            Arc::new(FakeStore::new(vec![], vec![])),
            Arc::new(KeystreamCipher),
            Arc::new(FixedClock(fixed_now())),
            Duration::from_secs(1),
            1,
        )
        .unwrap();

        let record = DisbursementRecord {
            id: 1,
            merchant_id: 1,
            merchant_custom_order_id: "ORD-1".to_string(),
            system_order_id: "SYS-1".to_string(),
            provider: "walletpay".to_string(),
            destination: "923001234567".to_string(),
            kind: DisbursementKind::Disbursement,
            requested_amount: dec!(1000),
            commission: dec!(20),
            gst: dec!(170),
            withholding_tax: dec!(100),
            merchant_amount: dec!(1290),
            payout_amount: dec!(1000),
            status: DisbursementStatus::Failed,
            response_message: Some("wallet blocked".to_string()),
            provider_txn_id: None,
            funds_reserved: false,
            callback_sent: false,
            settled: false,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let payload = notifier.payload_for(&record);
        assert_eq!(payload.time, fixed_now().timestamp());
        // Failed outcomes are notified too, with the status on the wire.
        assert_eq!(payload.status, "failed");
        assert_eq!(payload.order_id, "ORD-1");
    }
}
