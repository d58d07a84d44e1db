use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};
use crate::ledger::models::{DisbursementKind, Merchant};

/// One outbound call to a provider. Single-leg providers use `Transfer`;
/// inquiry/confirm providers run `Inquiry` then `Confirm`, each with its own
/// freshly generated reference id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderLeg {
    Transfer,
    Inquiry,
    Confirm,
}

/// Classified result of a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    /// Success sentinel matched.
    Accepted {
        provider_txn_id: Option<String>,
        message: String,
    },
    /// Envelope decrypted but the provider's own code signals failure.
    Declined { code: String, message: String },
    /// Envelope present, inner encrypted data absent. Likely a provider-side
    /// timeout; inconclusive, never a hard failure.
    NoResponseBody,
    /// DNS / connect / timeout at the transport layer. Inconclusive.
    TransportError(String),
}

/// Everything an adapter needs to build one leg's payload.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub destination: String,
    pub account: String,
    pub amount: Decimal,
    /// Fresh per leg, distinct from the disbursement's order id.
    pub reference_id: String,
    /// Provider-side transaction id obtained from a prior leg, if any.
    pub provider_txn_id: Option<String>,
    pub kind: DisbursementKind,
}

/// Credentials for reaching a merchant's configured provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub base_url: String,
    pub token: String,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl ProviderCredentials {
    pub fn from_merchant(merchant: &Merchant) -> AppResult<Self> {
        let key = hex::decode(&merchant.provider_key)
            .map_err(|_| AppError::Config(format!("Bad provider key for merchant {}", merchant.id)))?;
        let iv = hex::decode(&merchant.provider_iv)
            .map_err(|_| AppError::Config(format!("Bad provider iv for merchant {}", merchant.id)))?;
        Ok(Self {
            base_url: merchant.provider_base_url.clone(),
            token: merchant.provider_token.clone(),
            key,
            iv,
        })
    }
}

/// Provider-specific wire format, factored out of the reconciler so every
/// provider variant shares one orchestration path.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Legs this provider requires, in execution order.
    fn legs(&self) -> &'static [ProviderLeg];

    /// Destination-specific precondition, checked before any side effect.
    fn validate_destination(&self, destination: &str) -> AppResult<()>;

    fn endpoint_path(&self, leg: ProviderLeg) -> &'static str;

    fn build_payload(&self, ctx: &DispatchContext, leg: ProviderLeg) -> AppResult<serde_json::Value>;

    /// Match the decrypted inner body against the provider's success
    /// sentinel and pull out its transaction id and message.
    fn interpret(&self, leg: ProviderLeg, body: &serde_json::Value) -> ProviderOutcome;
}

/// Transport seam between the reconciler and provider HTTP calls.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        credentials: &ProviderCredentials,
        ctx: &DispatchContext,
        leg: ProviderLeg,
    ) -> AppResult<ProviderOutcome>;
}
