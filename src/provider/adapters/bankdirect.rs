use serde_json::json;

use crate::error::{AppResult, DisburseError};
use crate::provider::traits::{DispatchContext, ProviderAdapter, ProviderLeg, ProviderOutcome};

const SUCCESS_CODE: &str = "00";

/// Two-leg bank transfer provider: an inquiry call yields the provider-side
/// transaction id, then a confirm call commits it. Each leg carries its own
/// fresh reference id so provider-side idempotency never collides across the
/// two legs.
pub struct BankDirectAdapter;

impl ProviderAdapter for BankDirectAdapter {
    fn name(&self) -> &'static str {
        "bankdirect"
    }

    fn legs(&self) -> &'static [ProviderLeg] {
        &[ProviderLeg::Inquiry, ProviderLeg::Confirm]
    }

    fn validate_destination(&self, destination: &str) -> AppResult<()> {
        let well_formed = (10..=24).contains(&destination.len())
            && destination.chars().all(|c| c.is_ascii_alphanumeric());
        if !well_formed {
            return Err(DisburseError::Validation(format!(
                "Invalid bank account number: {}",
                destination
            ))
            .into());
        }
        Ok(())
    }

    fn endpoint_path(&self, leg: ProviderLeg) -> &'static str {
        match leg {
            ProviderLeg::Confirm => "/api/v1/bank/confirm",
            _ => "/api/v1/bank/inquiry",
        }
    }

    fn build_payload(&self, ctx: &DispatchContext, leg: ProviderLeg) -> AppResult<serde_json::Value> {
        match leg {
            ProviderLeg::Confirm => {
                let txn_id = ctx.provider_txn_id.as_deref().ok_or_else(|| {
                    DisburseError::Validation(
                        "Confirm leg requires the inquiry transaction id".to_string(),
                    )
                })?;
                Ok(json!({
                    "reference_id": ctx.reference_id,
                    "transaction_id": txn_id,
                    "amount": ctx.amount.to_string(),
                }))
            }
            _ => Ok(json!({
                "reference_id": ctx.reference_id,
                "account_number": ctx.destination,
                "sender_account": ctx.account,
                "amount": ctx.amount.to_string(),
                "type": ctx.kind.as_str(),
            })),
        }
    }

    fn interpret(&self, leg: ProviderLeg, body: &serde_json::Value) -> ProviderOutcome {
        let code = body
            .get("status_code")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        let message = body
            .get("status_desc")
            .and_then(|m| m.as_str())
            .unwrap_or("no description")
            .to_string();
        let txn_id = body
            .get("transaction_id")
            .and_then(|t| t.as_str())
            .map(str::to_string);

        if code != SUCCESS_CODE {
            return ProviderOutcome::Declined {
                code: code.to_string(),
                message,
            };
        }

        // An inquiry "success" without a transaction id leaves us nothing to
        // confirm against; treat it as inconclusive.
        if leg == ProviderLeg::Inquiry && txn_id.is_none() {
            return ProviderOutcome::NoResponseBody;
        }

        ProviderOutcome::Accepted {
            provider_txn_id: txn_id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::DisbursementKind;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn ctx(txn: Option<&str>) -> DispatchContext {
        DispatchContext {
            destination: "PK36SCBL0000001123456702".to_string(),
            account: "ACC-1".to_string(),
            amount: dec!(500),
            reference_id: "REF-2".to_string(),
            provider_txn_id: txn.map(str::to_string),
            kind: DisbursementKind::Refund,
        }
    }

    #[test]
    fn two_legs_in_order() {
        assert_eq!(
            BankDirectAdapter.legs(),
            &[ProviderLeg::Inquiry, ProviderLeg::Confirm]
        );
    }

    #[test]
    fn confirm_payload_requires_inquiry_txn_id() {
        assert!(BankDirectAdapter
            .build_payload(&ctx(None), ProviderLeg::Confirm)
            .is_err());

        let payload = BankDirectAdapter
            .build_payload(&ctx(Some("BNK-77")), ProviderLeg::Confirm)
            .unwrap();
        assert_eq!(payload["transaction_id"], "BNK-77");
    }

    #[test]
    fn inquiry_success_without_txn_id_is_inconclusive() {
        let outcome = BankDirectAdapter.interpret(
            ProviderLeg::Inquiry,
            &json!({"status_code": "00", "status_desc": "ok"}),
        );
        assert_eq!(outcome, ProviderOutcome::NoResponseBody);
    }

    #[test]
    fn inquiry_success_with_txn_id_is_accepted() {
        let outcome = BankDirectAdapter.interpret(
            ProviderLeg::Inquiry,
            &json!({"status_code": "00", "status_desc": "ok", "transaction_id": "BNK-77"}),
        );
        assert_eq!(
            outcome,
            ProviderOutcome::Accepted {
                provider_txn_id: Some("BNK-77".to_string()),
                message: "ok".to_string()
            }
        );
    }

    #[test]
    fn failure_code_is_declined_at_either_leg() {
        for leg in [ProviderLeg::Inquiry, ProviderLeg::Confirm] {
            let outcome = BankDirectAdapter.interpret(
                leg,
                &json!({"status_code": "51", "status_desc": "account closed"}),
            );
            assert!(matches!(outcome, ProviderOutcome::Declined { ref code, .. } if code == "51"));
        }
    }
}
