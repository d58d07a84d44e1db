use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::provider::cipher::PayloadCipher;
use crate::provider::traits::{
    Dispatch, DispatchContext, ProviderAdapter, ProviderCredentials, ProviderLeg, ProviderOutcome,
};

/// HTTP dispatcher: serialize, encrypt, POST with bearer token, decrypt,
/// classify. Transport failures become `ProviderOutcome::TransportError`,
/// never an `Err` - the reconciler decides what inconclusive means.
pub struct HttpDispatcher {
    http: reqwest::Client,
    cipher: Arc<dyn PayloadCipher>,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration, cipher: Arc<dyn PayloadCipher>) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, cipher })
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        credentials: &ProviderCredentials,
        ctx: &DispatchContext,
        leg: ProviderLeg,
    ) -> AppResult<ProviderOutcome> {
        let payload = adapter.build_payload(ctx, leg)?;
        let plaintext = serde_json::to_vec(&payload)?;
        let ciphertext = self
            .cipher
            .encrypt(&plaintext, &credentials.key, &credentials.iv)?;

        let url = format!("{}{}", credentials.base_url, adapter.endpoint_path(leg));
        debug!(
            provider = adapter.name(),
            reference_id = %ctx.reference_id,
            ?leg,
            "dispatching provider call"
        );

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&credentials.token)
            .json(&json!({ "data": ciphertext }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = adapter.name(), reference_id = %ctx.reference_id,
                      "transport failure: {}", e);
                return Ok(ProviderOutcome::TransportError(e.to_string()));
            }
        };

        let envelope: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(provider = adapter.name(), "unreadable response envelope: {}", e);
                return Ok(ProviderOutcome::TransportError(e.to_string()));
            }
        };

        let inner = match envelope.get("data").and_then(|d| d.as_str()) {
            Some(ct) if !ct.is_empty() => ct,
            _ => return Ok(ProviderOutcome::NoResponseBody),
        };

        let decrypted = match self.cipher.decrypt(inner, &credentials.key, &credentials.iv) {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = adapter.name(), "undecryptable response body: {}", e);
                return Ok(ProviderOutcome::NoResponseBody);
            }
        };

        let body: serde_json::Value = match serde_json::from_slice(&decrypted) {
            Ok(v) => v,
            Err(e) => {
                warn!(provider = adapter.name(), "unparseable response body: {}", e);
                return Ok(ProviderOutcome::NoResponseBody);
            }
        };

        Ok(adapter.interpret(leg, &body))
    }
}
