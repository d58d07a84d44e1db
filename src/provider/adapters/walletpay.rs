use serde_json::json;

use crate::error::{AppResult, DisburseError};
use crate::provider::traits::{DispatchContext, ProviderAdapter, ProviderLeg, ProviderOutcome};

const SUCCESS_CODE: &str = "0000";

/// Single-leg mobile wallet provider. Destinations are MSISDNs that must
/// carry the provider's expected country-code prefix.
pub struct WalletPayAdapter {
    country_prefix: &'static str,
}

impl WalletPayAdapter {
    pub fn new() -> Self {
        Self { country_prefix: "92" }
    }
}

impl ProviderAdapter for WalletPayAdapter {
    fn name(&self) -> &'static str {
        "walletpay"
    }

    fn legs(&self) -> &'static [ProviderLeg] {
        &[ProviderLeg::Transfer]
    }

    fn validate_destination(&self, destination: &str) -> AppResult<()> {
        let digits_only = destination.chars().all(|c| c.is_ascii_digit());
        if !digits_only || !(11..=13).contains(&destination.len()) {
            return Err(DisburseError::Validation(format!(
                "Invalid wallet msisdn: {}",
                destination
            ))
            .into());
        }
        if !destination.starts_with(self.country_prefix) {
            return Err(DisburseError::Validation(format!(
                "Wallet msisdn must start with country code {}",
                self.country_prefix
            ))
            .into());
        }
        Ok(())
    }

    fn endpoint_path(&self, _leg: ProviderLeg) -> &'static str {
        "/api/v1/wallet/transfer"
    }

    fn build_payload(&self, ctx: &DispatchContext, _leg: ProviderLeg) -> AppResult<serde_json::Value> {
        Ok(json!({
            "reference_id": ctx.reference_id,
            "msisdn": ctx.destination,
            "sender_account": ctx.account,
            "amount": ctx.amount.to_string(),
            "type": ctx.kind.as_str(),
        }))
    }

    fn interpret(&self, _leg: ProviderLeg, body: &serde_json::Value) -> ProviderOutcome {
        let code = body
            .get("response_code")
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        let message = body
            .get("response_desc")
            .and_then(|m| m.as_str())
            .unwrap_or("no description")
            .to_string();

        if code == SUCCESS_CODE {
            ProviderOutcome::Accepted {
                provider_txn_id: body
                    .get("transaction_id")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
                message,
            }
        } else {
            ProviderOutcome::Declined {
                code: code.to_string(),
                message,
            }
        }
    }
}
