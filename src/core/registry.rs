//! Host registry.
//!
//! Two disjoint collections of [`HostListing`]s: the public set loaded from
//! configuration, which is enumerable, and the unlisted set of uploaded
//! graphs, which is reachable only by exact id. Every lookup scans public
//! listings first, so a public id shadows an unlisted one.

use crate::core::models::{HostListing, HostSummary};
use std::sync::{PoisonError, RwLock};
use tracing::info;

#[derive(Debug, Default)]
pub struct HostRegistry {
    public: RwLock<Vec<HostListing>>,
    unlisted: RwLock<Vec<HostListing>>,
}

impl HostRegistry {
    #[must_use]
    pub fn new(public: Vec<HostListing>) -> Self {
        Self {
            public: RwLock::new(public),
            unlisted: RwLock::new(Vec::new()),
        }
    }

    fn find<T>(&self, pick: impl Fn(&HostListing) -> Option<T>) -> Option<T> {
        let public = self.public.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = public.iter().find_map(&pick) {
            return Some(found);
        }
        drop(public);
        let unlisted = self.unlisted.read().unwrap_or_else(PoisonError::into_inner);
        unlisted.iter().find_map(&pick)
    }

    /// Resolves a host id to its URI.
    #[must_use]
    pub fn get_uri_from_id(&self, id: &str) -> Option<String> {
        self.find(|h| (h.id == id).then(|| h.uri.clone()))
    }

    #[must_use]
    pub fn get_listing_from_id(&self, id: &str) -> Option<HostListing> {
        self.find(|h| (h.id == id).then(|| h.clone()))
    }

    /// Reverse lookup of a display name by URI.
    #[must_use]
    pub fn get_name_from_uri(&self, uri: &str) -> Option<String> {
        self.find(|h| (h.uri == uri).then(|| h.name.clone()))
    }

    /// Public listings in configuration order.
    #[must_use]
    pub fn public_listings(&self) -> Vec<HostListing> {
        self.public
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `{id, name}` for every public listing.
    #[must_use]
    pub fn list_hosts(&self) -> Vec<HostSummary> {
        self.public
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| HostSummary {
                id: h.id.clone(),
                name: h.name.clone(),
            })
            .collect()
    }

    /// Registers an unlisted host, replacing any unlisted host with the same id.
    pub fn add_temporary_host(&self, listing: HostListing) {
        let mut unlisted = self.unlisted.write().unwrap_or_else(PoisonError::into_inner);
        info!(host_id = %listing.id, uri = %listing.uri, "registering unlisted host");
        match unlisted.iter_mut().find(|h| h.id == listing.id) {
            Some(existing) => *existing = listing,
            None => unlisted.push(listing),
        }
    }

    /// Removes an unlisted host. Returns false when no such host exists.
    pub fn remove_temporary_host(&self, id: &str) -> bool {
        let mut unlisted = self.unlisted.write().unwrap_or_else(PoisonError::into_inner);
        let before = unlisted.len();
        unlisted.retain(|h| h.id != id);
        before != unlisted.len()
    }

    #[must_use]
    pub fn temporary_host(&self, id: &str) -> Option<HostListing> {
        self.unlisted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|h| h.id == id)
            .cloned()
    }
}
