//! Host provider router.
//!
//! An ordered strategy chain: providers are kept in registration order and a
//! URI resolves to the first provider whose `accepts` returns true. When two
//! providers accept the same URI the earlier one shadows the later one.
//! Nothing is cached, so a replaced provider is visible to the next lookup.

use crate::core::models::{HostListing, HostProviderPublicListing};
use crate::providers::HostProvider;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

type Entry = (String, Arc<dyn HostProvider>);

#[derive(Default)]
pub struct HostProviderRouter {
    providers: RwLock<Vec<Entry>>,
}

impl std::fmt::Debug for HostProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProviderRouter")
            .field("providers", &self.list_providers())
            .finish()
    }
}

impl HostProviderRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a provider, or replaces the provider already registered under
    /// `id` while keeping its position.
    pub fn add_provider(&self, id: impl Into<String>, provider: Arc<dyn HostProvider>) {
        let id = id.into();
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        info!(provider_id = %id, provider_type = provider.provider_type(), "registering provider");
        match providers.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = provider,
            None => providers.push((id, provider)),
        }
    }

    /// First provider, in registration order, that accepts `uri`.
    #[must_use]
    pub fn provider_for(&self, uri: &str) -> Option<Arc<dyn HostProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, provider)| provider.accepts(uri))
            .map(|(_, provider)| Arc::clone(provider))
    }

    /// Id of the provider that [`provider_for`](Self::provider_for) would return.
    #[must_use]
    pub fn provider_id_for(&self, uri: &str) -> Option<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, provider)| provider.accepts(uri))
            .map(|(id, _)| id.clone())
    }

    #[must_use]
    pub fn provider_by_id(&self, id: &str) -> Option<Arc<dyn HostProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, provider)| Arc::clone(provider))
    }

    /// One flag per listing, in input order: true iff some provider accepts
    /// the listing's URI.
    #[must_use]
    pub fn validate_hosts(&self, listings: &[HostListing]) -> Vec<bool> {
        listings
            .iter()
            .map(|listing| self.provider_for(&listing.uri).is_some())
            .collect()
    }

    /// Registered providers in routing order.
    #[must_use]
    pub fn list_providers(&self) -> Vec<HostProviderPublicListing> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, provider)| HostProviderPublicListing {
                id: id.clone(),
                provider_type: provider.provider_type().to_string(),
            })
            .collect()
    }

    /// Snapshot of every provider, for callers that need to inspect capabilities.
    #[must_use]
    pub fn providers(&self) -> Vec<(String, Arc<dyn HostProvider>)> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
