use std::sync::Arc;
use tracing::debug;

use super::client::OAuthClient;
use super::provider::{IdentityExtractor, OAuthProvider, Provider};

/// Providers by name, kept in registration order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider from its parts. Re-registering a name replaces the
    /// previous entry in place.
    pub fn register_provider(
        &mut self,
        name: &str,
        client: Arc<dyn OAuthClient>,
        extractor: Arc<dyn IdentityExtractor>,
    ) {
        self.register_provider_ext(Arc::new(Provider::new(name, client, extractor)));
    }

    /// Register a full provider implementation.
    pub fn register_provider_ext(&mut self, provider: Arc<dyn OAuthProvider>) {
        let name = provider.name().to_string();
        if let Some(slot) = self.providers.iter_mut().find(|p| p.name() == name) {
            debug!(provider = %name, "replacing provider registration");
            *slot = provider;
        } else {
            debug!(provider = %name, "registering provider");
            self.providers.push(provider);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
