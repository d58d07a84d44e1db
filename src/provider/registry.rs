use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{AppResult, DisburseError};
use crate::provider::adapters::{BankDirectAdapter, WalletPayAdapter};
use crate::provider::traits::ProviderAdapter;

/// Registry of provider adapters, keyed by the provider name stored on the
/// merchant row.
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with all shipped providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WalletPayAdapter::new()));
        registry.register(Arc::new(BankDirectAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        info!("Registering provider adapter: {}", adapter.name());
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned().ok_or_else(|| {
            DisburseError::Validation(format!("Unknown provider: {}", name)).into()
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(|k| k.as_str()).collect()
    }
}
