//! Disbursement orchestration state machine.
//!
//! Validating -> Reserving -> Dispatching -> {Committing | Compensating}
//! -> Terminal(Completed | Failed | PendingRetry). Exactly-once economic
//! effect rests on the conditional balance reservation plus compensating
//! credits, not on a distributed commit protocol: the provider call sits
//! between reservation and commit, and every non-success path credits the
//! reservation back before reporting.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppResult, DisburseError};
use crate::fees::{self, FeeMode};
use crate::idgen::{Clock, OrderIdGenerator};
use crate::ledger::models::{
    DisbursementKind, DisbursementRecord, DisbursementStatus, Merchant, NewDisbursement,
};
use crate::provider::registry::ProviderRegistry;
use crate::provider::traits::{
    Dispatch, DispatchContext, ProviderAdapter, ProviderCredentials, ProviderOutcome,
};
use crate::settlement::business_days::add_business_days;
use crate::webhook::Notifier;

use super::store::DisbursementStore;

fn default_kind() -> DisbursementKind {
    DisbursementKind::Disbursement
}

/// Inbound disbursement request, as handed over by the HTTP layer.
#[derive(Debug, Clone, Deserialize)]
pub struct DisbursementRequest {
    pub amount: Decimal,
    pub destination: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: DisbursementKind,
    #[serde(default)]
    pub fee_mode: FeeMode,
}

/// Terminal success payload returned to the calling layer.
#[derive(Debug, Clone, Serialize)]
pub struct DisbursementOutcome {
    pub message: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub merchant_amount: Decimal,
    pub order_id: String,
    pub provider_reference: String,
    pub status: DisbursementStatus,
}

/// Collapsed result of the provider leg(s).
enum LegsResult {
    Accepted {
        provider_txn_id: Option<String>,
        message: String,
    },
    Declined {
        code: String,
        message: String,
        last_txn_id: Option<String>,
    },
    Inconclusive {
        last_txn_id: Option<String>,
        detail: String,
    },
}

pub struct Reconciler {
    store: Arc<dyn DisbursementStore>,
    dispatcher: Arc<dyn Dispatch>,
    providers: Arc<ProviderRegistry>,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn OrderIdGenerator>,
    webhook: Arc<dyn Notifier>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DisbursementStore>,
        dispatcher: Arc<dyn Dispatch>,
        providers: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn OrderIdGenerator>,
        webhook: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            providers,
            clock,
            idgen,
            webhook,
        }
    }

    /// Drive one disbursement end to end.
    pub async fn initiate(
        &self,
        merchant_uid: Uuid,
        request: DisbursementRequest,
    ) -> AppResult<DisbursementOutcome> {
        // ---- Validating ----
        let merchant = self
            .store
            .find_merchant_by_uid(merchant_uid)
            .await?
            .ok_or_else(|| {
                DisburseError::Validation(format!("Unknown merchant: {}", merchant_uid))
            })?;

        if !merchant.has_disbursement_account() {
            return Err(DisburseError::Validation(format!(
                "Merchant {} has no disbursement account",
                merchant_uid
            ))
            .into());
        }

        let adapter = self.providers.get(&merchant.provider)?;
        adapter.validate_destination(&request.destination)?;

        // ---- Idempotency guard ----
        let now = self.clock.now();
        let (caller_order_id, system_order_id) = match request.order_id.as_deref() {
            Some(oid) if !oid.is_empty() => {
                if self
                    .store
                    .find_active_order(merchant.id, oid)
                    .await?
                    .is_some()
                {
                    return Err(DisburseError::DuplicateOrder(oid.to_string()).into());
                }
                (oid.to_string(), self.idgen.next_id(now))
            }
            _ => {
                let generated = self.idgen.next_id(now);
                (generated.clone(), generated)
            }
        };

        // ---- Fee calculation ----
        let terms = self
            .store
            .financial_terms(merchant.id)
            .await?
            .ok_or_else(|| {
                DisburseError::Validation(format!(
                    "Merchant {} has no financial terms",
                    merchant_uid
                ))
            })?;
        let fees = fees::compute(request.amount, &terms, request.fee_mode)?;

        // ---- Reserving ----
        self.store.reserve(merchant.id, fees.merchant_amount).await?;
        info!(
            merchant_id = merchant.id,
            order_id = %system_order_id,
            amount = %fees.merchant_amount,
            event = "funds_reserved",
            reason = request.reason.as_deref().unwrap_or(""),
        );

        // ---- Dispatching ----
        let legs = match self
            .run_legs(
                adapter.as_ref(),
                &merchant,
                &request.destination,
                fees.payout_amount,
                request.kind,
            )
            .await
        {
            Ok(l) => l,
            Err(e) => {
                self.compensate_quietly(merchant.id, fees.merchant_amount, &system_order_id)
                    .await;
                return Err(e);
            }
        };

        let new_record = |status, funds_reserved, message: Option<String>, txn: Option<String>| {
            NewDisbursement {
                merchant_id: merchant.id,
                merchant_custom_order_id: caller_order_id.clone(),
                system_order_id: system_order_id.clone(),
                provider: merchant.provider.clone(),
                destination: request.destination.clone(),
                kind: request.kind,
                requested_amount: request.amount,
                commission: fees.commission,
                gst: fees.gst,
                withholding_tax: fees.withholding_tax,
                merchant_amount: fees.merchant_amount,
                payout_amount: fees.payout_amount,
                status,
                response_message: message,
                provider_txn_id: txn,
                funds_reserved,
            }
        };

        match legs {
            // ---- Committing ----
            LegsResult::Accepted {
                provider_txn_id,
                message,
            } => {
                let settlement_due = add_business_days(
                    now.date_naive(),
                    terms.settlement_duration_days,
                );
                let record = match self
                    .store
                    .persist_outcome(
                        new_record(
                            DisbursementStatus::Completed,
                            true,
                            Some("success".to_string()),
                            provider_txn_id,
                        ),
                        Some(settlement_due),
                    )
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        // The payout already left through the provider, so the
                        // reservation must stand; this needs manual reconciliation.
                        error!(
                            merchant_id = merchant.id,
                            order_id = %system_order_id,
                            event = "commit_persist_failed",
                            "completed disbursement could not be persisted: {}", e
                        );
                        return Err(e);
                    }
                };

                info!(
                    merchant_id = merchant.id,
                    order_id = %system_order_id,
                    provider_reference = record.provider_reference(),
                    event = "disbursement_completed",
                    "{}", message
                );
                self.webhook.enqueue(&merchant, &record);

                Ok(DisbursementOutcome {
                    message: "success".to_string(),
                    merchant_amount: fees.merchant_amount,
                    order_id: caller_order_id,
                    provider_reference: record.provider_reference().to_string(),
                    status: DisbursementStatus::Completed,
                })
            }

            // ---- Compensating: provider said no ----
            LegsResult::Declined {
                code,
                message,
                last_txn_id,
            } => {
                self.compensate_quietly(merchant.id, fees.merchant_amount, &system_order_id)
                    .await;
                match self
                    .store
                    .persist_outcome(
                        new_record(
                            DisbursementStatus::Failed,
                            false,
                            Some(message.clone()),
                            last_txn_id,
                        ),
                        None,
                    )
                    .await
                {
                    Ok(record) => self.webhook.enqueue(&merchant, &record),
                    Err(e) => {
                        error!(
                            merchant_id = merchant.id,
                            order_id = %system_order_id,
                            "failed to persist declined record: {}", e
                        );
                    }
                }
                info!(
                    merchant_id = merchant.id,
                    order_id = %system_order_id,
                    code = %code,
                    event = "disbursement_declined",
                );
                Err(DisburseError::ProviderDeclined {
                    order_id: caller_order_id,
                    code,
                    message,
                }
                .into())
            }

            // ---- Compensating: outcome unknown, hand over to the sweeper ----
            LegsResult::Inconclusive {
                last_txn_id,
                detail,
            } => {
                self.compensate_quietly(merchant.id, fees.merchant_amount, &system_order_id)
                    .await;
                if let Err(e) = self
                    .store
                    .persist_outcome(
                        new_record(
                            DisbursementStatus::Pending,
                            false,
                            Some(detail.clone()),
                            last_txn_id,
                        ),
                        None,
                    )
                    .await
                {
                    error!(
                        merchant_id = merchant.id,
                        order_id = %system_order_id,
                        "failed to persist pending record: {}", e
                    );
                }
                info!(
                    merchant_id = merchant.id,
                    order_id = %system_order_id,
                    event = "disbursement_pending_retry",
                    "{}", detail
                );
                Err(DisburseError::ProviderUnreachable {
                    order_id: caller_order_id,
                    detail,
                }
                .into())
            }
        }
    }

    /// Re-drive a pending record without repeating work already done.
    /// Reservation is re-taken only when the record says none is held.
    pub async fn redrive(&self, record: &DisbursementRecord) -> AppResult<DisbursementStatus> {
        let merchant = self
            .store
            .find_merchant(record.merchant_id)
            .await?
            .ok_or_else(|| {
                crate::error::AppError::NotFound(format!(
                    "Merchant {} for pending record {}",
                    record.merchant_id, record.id
                ))
            })?;
        let adapter = self.providers.get(&record.provider)?;

        if !record.funds_reserved {
            match self.store.reserve(merchant.id, record.merchant_amount).await {
                Ok(()) => {
                    self.store.set_funds_reserved(record.id, true).await?;
                }
                Err(e) if e.is_retryable() => {
                    info!(
                        merchant_id = merchant.id,
                        order_id = %record.system_order_id,
                        event = "redrive_deferred",
                        "reservation conflict, will retry next sweep"
                    );
                    return Ok(DisbursementStatus::Pending);
                }
                Err(crate::error::AppError::Disburse(DisburseError::InsufficientBalance {
                    ..
                })) => {
                    warn!(
                        merchant_id = merchant.id,
                        order_id = %record.system_order_id,
                        event = "redrive_deferred",
                        "insufficient balance, will retry next sweep"
                    );
                    return Ok(DisbursementStatus::Pending);
                }
                Err(e) => return Err(e),
            }
        }

        let legs = match self
            .run_legs(
                adapter.as_ref(),
                &merchant,
                &record.destination,
                record.payout_amount,
                record.kind,
            )
            .await
        {
            Ok(l) => l,
            Err(e) => {
                self.compensate_quietly(merchant.id, record.merchant_amount, &record.system_order_id)
                    .await;
                self.store.set_funds_reserved(record.id, false).await?;
                return Err(e);
            }
        };

        match legs {
            LegsResult::Accepted {
                provider_txn_id,
                message,
            } => {
                let duration = self
                    .store
                    .financial_terms(merchant.id)
                    .await?
                    .map(|t| t.settlement_duration_days)
                    .unwrap_or(1);
                let settlement_due =
                    add_business_days(self.clock.now().date_naive(), duration);
                self.store
                    .complete_record(
                        record.id,
                        provider_txn_id.as_deref(),
                        "success",
                        settlement_due,
                    )
                    .await?;
                info!(
                    merchant_id = merchant.id,
                    order_id = %record.system_order_id,
                    event = "redrive_completed",
                    "{}", message
                );
                if let Some(updated) = self
                    .store
                    .find_active_order(merchant.id, &record.merchant_custom_order_id)
                    .await?
                {
                    self.webhook.enqueue(&merchant, &updated);
                }
                Ok(DisbursementStatus::Completed)
            }
            LegsResult::Declined {
                code,
                message,
                last_txn_id,
            } => {
                self.compensate_quietly(merchant.id, record.merchant_amount, &record.system_order_id)
                    .await;
                self.store
                    .fail_record(record.id, last_txn_id.as_deref(), &message)
                    .await?;
                info!(
                    merchant_id = merchant.id,
                    order_id = %record.system_order_id,
                    code = %code,
                    event = "redrive_failed",
                );
                if let Some(updated) = self
                    .store
                    .find_active_order(merchant.id, &record.merchant_custom_order_id)
                    .await?
                {
                    self.webhook.enqueue(&merchant, &updated);
                }
                Ok(DisbursementStatus::Failed)
            }
            LegsResult::Inconclusive { detail, .. } => {
                self.compensate_quietly(merchant.id, record.merchant_amount, &record.system_order_id)
                    .await;
                self.store.set_funds_reserved(record.id, false).await?;
                info!(
                    merchant_id = merchant.id,
                    order_id = %record.system_order_id,
                    event = "redrive_still_pending",
                    "{}", detail
                );
                Ok(DisbursementStatus::Pending)
            }
        }
    }

    /// Run the provider leg(s) in order. Each leg gets a freshly generated
    /// reference id; a provider txn id from an earlier leg feeds the next.
    async fn run_legs(
        &self,
        adapter: &dyn ProviderAdapter,
        merchant: &Merchant,
        destination: &str,
        amount: Decimal,
        kind: DisbursementKind,
    ) -> AppResult<LegsResult> {
        let credentials = ProviderCredentials::from_merchant(merchant)?;
        let mut last_txn_id: Option<String> = None;
        let mut message = String::new();

        for &leg in adapter.legs() {
            let ctx = DispatchContext {
                destination: destination.to_string(),
                account: merchant.disbursement_account.clone().unwrap_or_default(),
                amount,
                reference_id: self.idgen.next_id(self.clock.now()),
                provider_txn_id: last_txn_id.clone(),
                kind,
            };

            match self
                .dispatcher
                .dispatch(adapter, &credentials, &ctx, leg)
                .await?
            {
                ProviderOutcome::Accepted {
                    provider_txn_id,
                    message: leg_message,
                } => {
                    if provider_txn_id.is_some() {
                        last_txn_id = provider_txn_id;
                    }
                    message = leg_message;
                }
                ProviderOutcome::Declined { code, message } => {
                    return Ok(LegsResult::Declined {
                        code,
                        message,
                        last_txn_id,
                    });
                }
                ProviderOutcome::NoResponseBody => {
                    return Ok(LegsResult::Inconclusive {
                        last_txn_id,
                        detail: "provider returned no response body".to_string(),
                    });
                }
                ProviderOutcome::TransportError(detail) => {
                    return Ok(LegsResult::Inconclusive {
                        last_txn_id,
                        detail,
                    });
                }
            }
        }

        Ok(LegsResult::Accepted {
            provider_txn_id: last_txn_id,
            message,
        })
    }

    /// Best-effort credit-back. Never masks the error being reported.
    async fn compensate_quietly(&self, merchant_id: i64, amount: Decimal, order_id: &str) {
        if let Err(e) = self.store.compensate(merchant_id, amount).await {
            error!(
                merchant_id,
                order_id = %order_id,
                amount = %amount,
                event = "compensation_failed",
                "balance credit-back failed, manual reconciliation required: {}", e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::disburse::testkit::*;
    use crate::error::{AppError, DisburseError};
    use crate::ledger::models::{DisbursementStatus, FinancialTerms, Merchant};
    use crate::provider::registry::ProviderRegistry;
    use crate::provider::traits::{ProviderLeg, ProviderOutcome};

    use super::*;

    type Engine = (
        Arc<FakeStore>,
        Arc<FakeDispatcher>,
        Arc<FakeNotifier>,
        Reconciler,
    );

    fn engine(
        merchants: Vec<Merchant>,
        terms: Vec<FinancialTerms>,
        script: Vec<ProviderOutcome>,
    ) -> Engine {
        let store = Arc::new(FakeStore::new(merchants, terms));
        let dispatcher = Arc::new(FakeDispatcher::scripted(script));
        let notifier = Arc::new(FakeNotifier::default());
        let reconciler = Reconciler::new(
            store.clone(),
            dispatcher.clone(),
            Arc::new(ProviderRegistry::with_defaults()),
            Arc::new(FixedClock(fixed_now())),
            Arc::new(SeqIds(AtomicU64::new(1))),
            notifier.clone(),
        );
        (store, dispatcher, notifier, reconciler)
    }

    fn request(amount: rust_decimal::Decimal, destination: &str) -> DisbursementRequest {
        DisbursementRequest {
            amount,
            destination: destination.to_string(),
            order_id: None,
            reason: None,
            kind: crate::ledger::models::DisbursementKind::Disbursement,
            fee_mode: FeeMode::FixedPayout,
        }
    }

    fn accepted(txn: &str) -> ProviderOutcome {
        ProviderOutcome::Accepted {
            provider_txn_id: Some(txn.to_string()),
            message: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_disbursement_commits_record_and_task() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, _, notifier, reconciler) =
            engine(vec![m], vec![terms(1)], vec![accepted("TXN-1")]);

        let outcome = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap();

        assert_eq!(outcome.status, DisbursementStatus::Completed);
        assert_eq!(outcome.merchant_amount, dec!(1290.00));
        assert_eq!(outcome.provider_reference, "TXN-1");

        // Balance charged exactly once, by the net merchant amount.
        assert_eq!(store.balance_of(1), dec!(3710.00));

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DisbursementStatus::Completed);
        assert!(records[0].funds_reserved);
        assert_eq!(records[0].provider_txn_id.as_deref(), Some("TXN-1"));

        // Wed 2024-03-13 + 2 business days = Fri 2024-03-15
        let tasks = store.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].1, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());

        let notified = notifier.notifications();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].status, DisbursementStatus::Completed);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_no_trace() {
        let m = merchant(1, "walletpay", dec!(500));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) = engine(vec![m], vec![terms(1)], vec![]);

        let err = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::InsufficientBalance { .. })
        ));
        assert_eq!(store.balance_of(1), dec!(500));
        assert!(store.records().is_empty());
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_order_id_is_rejected_before_any_side_effect() {
        let m = merchant(1, "walletpay", dec!(50000));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) =
            engine(vec![m], vec![terms(1)], vec![accepted("TXN-1")]);

        let mut req = request(dec!(1000), "923001234567");
        req.order_id = Some("ORDER-A".to_string());
        reconciler.initiate(uid, req.clone()).await.unwrap();

        let err = reconciler.initiate(uid, req).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::DuplicateOrder(_))
        ));

        assert_eq!(store.records().len(), 1);
        assert_eq!(dispatcher.calls().len(), 1);
        // Only the first call touched the balance.
        assert_eq!(store.balance_of(1), dec!(50000) - dec!(1290.00));
    }

    #[tokio::test]
    async fn provider_timeout_compensates_and_parks_pending() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, _, notifier, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![ProviderOutcome::TransportError("connection reset".to_string())],
        );

        let err = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        // Balance restored to the pre-reservation value.
        assert_eq!(store.balance_of(1), dec!(5000));

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DisbursementStatus::Pending);
        assert!(!records[0].funds_reserved);
        assert!(store.tasks().is_empty());
        // Pending is not terminal; no callback yet.
        assert!(notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn empty_response_body_is_treated_like_a_timeout() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, _, _, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![ProviderOutcome::NoResponseBody],
        );

        let err = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.balance_of(1), dec!(5000));
        assert_eq!(store.records()[0].status, DisbursementStatus::Pending);
    }

    #[tokio::test]
    async fn provider_decline_compensates_and_persists_failure() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, _, notifier, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![ProviderOutcome::Declined {
                code: "E042".to_string(),
                message: "wallet blocked".to_string(),
            }],
        );

        let err = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::ProviderDeclined { .. })
        ));
        assert_eq!(store.balance_of(1), dec!(5000));

        let records = store.records();
        assert_eq!(records[0].status, DisbursementStatus::Failed);
        assert_eq!(
            records[0].response_message.as_deref(),
            Some("wallet blocked")
        );

        // Failed is terminal; the merchant hears about it too.
        let notified = notifier.notifications();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].status, DisbursementStatus::Failed);
    }

    #[tokio::test]
    async fn retryable_conflict_surfaces_with_no_record() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) = engine(vec![m], vec![terms(1)], vec![]);
        store.state.lock().unwrap().conflict_on_reserve = true;

        let err = reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::RetryableConflict)
        ));
        assert!(store.records().is_empty());
        assert!(dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_destination_fails_validation_with_no_side_effects() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) = engine(vec![m], vec![terms(1)], vec![]);

        let err = reconciler
            .initiate(uid, request(dec!(1000), "13001234567"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::Validation(_))
        ));
        assert_eq!(store.state.lock().unwrap().reserve_calls, 0);
        assert!(dispatcher.calls().is_empty());
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn two_leg_provider_runs_inquiry_then_confirm() {
        let m = merchant(1, "bankdirect", dec!(5000));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![accepted("BNK-1"), accepted("BNK-1")],
        );

        let outcome = reconciler
            .initiate(uid, request(dec!(1000), "PK36SCBL0000001123456702"))
            .await
            .unwrap();

        assert_eq!(outcome.status, DisbursementStatus::Completed);
        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, ProviderLeg::Inquiry);
        assert_eq!(calls[1].0, ProviderLeg::Confirm);
        // Each leg carries its own reference id.
        assert_ne!(calls[0].1, calls[1].1);
        assert_eq!(store.records()[0].provider_txn_id.as_deref(), Some("BNK-1"));
    }

    #[tokio::test]
    async fn decline_at_confirm_leg_keeps_inquiry_txn_id() {
        let m = merchant(1, "bankdirect", dec!(5000));
        let uid = m.uid;
        let (store, dispatcher, notifier, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![
                accepted("BNK-1"),
                ProviderOutcome::Declined {
                    code: "51".to_string(),
                    message: "account closed".to_string(),
                },
            ],
        );

        let err = reconciler
            .initiate(uid, request(dec!(1000), "PK36SCBL0000001123456702"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Disburse(DisburseError::ProviderDeclined { .. })
        ));
        assert_eq!(dispatcher.calls().len(), 2);
        // Compensated exactly once, failure record carries the inquiry txn id.
        assert_eq!(store.balance_of(1), dec!(5000));
        assert_eq!(store.state.lock().unwrap().compensate_calls, 1);
        let records = store.records();
        assert_eq!(records[0].status, DisbursementStatus::Failed);
        assert_eq!(records[0].provider_txn_id.as_deref(), Some("BNK-1"));
        assert_eq!(notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn timeout_at_inquiry_leg_never_reaches_confirm() {
        let m = merchant(1, "bankdirect", dec!(5000));
        let uid = m.uid;
        let (store, dispatcher, _, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![ProviderOutcome::TransportError("timed out".to_string())],
        );

        let err = reconciler
            .initiate(uid, request(dec!(1000), "PK36SCBL0000001123456702"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(dispatcher.calls().len(), 1);
        assert_eq!(store.balance_of(1), dec!(5000));
    }

    #[tokio::test]
    async fn balance_conservation_across_mixed_outcomes() {
        let m = merchant(1, "walletpay", dec!(5000));
        let uid = m.uid;
        let (store, _, _, reconciler) = engine(
            vec![m],
            vec![terms(1)],
            vec![
                accepted("TXN-1"),
                ProviderOutcome::TransportError("reset".to_string()),
                ProviderOutcome::Declined {
                    code: "E1".to_string(),
                    message: "no".to_string(),
                },
            ],
        );

        // completed: charges 1290
        reconciler
            .initiate(uid, request(dec!(1000), "923001234567"))
            .await
            .unwrap();
        // inconclusive: compensated
        let _ = reconciler
            .initiate(uid, request(dec!(500), "923001234567"))
            .await
            .unwrap_err();
        // declined: compensated
        let _ = reconciler
            .initiate(uid, request(dec!(200), "923001234567"))
            .await
            .unwrap_err();
        // insufficient: rejected outright
        let _ = reconciler
            .initiate(uid, request(dec!(100000), "923001234567"))
            .await
            .unwrap_err();

        // Only the completed disbursement moved money.
        assert_eq!(store.balance_of(1), dec!(5000) - dec!(1290.00));
    }
}
