//! Registered, subscribed and notified collections.
//!
//! All three are sharded concurrent maps. Readers get owned snapshots so no
//! shard lock is held while callers run listener or backend code.

use std::collections::{BTreeMap, HashMap, HashSet};

use dashmap::{DashMap, DashSet};

use crate::endpoint::Endpoint;
use crate::listener::ListenerHandle;

/// Latest list per category for one subscription.
pub type CategoryMap = BTreeMap<String, Vec<Endpoint>>;

#[derive(Default)]
pub struct RegistryState {
    registered: DashSet<Endpoint>,
    subscribed: DashMap<Endpoint, HashSet<ListenerHandle>>,
    notified: DashMap<Endpoint, CategoryMap>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_registered(&self, url: Endpoint) -> bool {
        self.registered.insert(url)
    }

    pub fn remove_registered(&self, url: &Endpoint) -> bool {
        self.registered.remove(url).is_some()
    }

    pub fn is_registered(&self, url: &Endpoint) -> bool {
        self.registered.contains(url)
    }

    pub fn registered(&self) -> HashSet<Endpoint> {
        self.registered.iter().map(|url| url.key().clone()).collect()
    }

    /// Adds `listener` under `url`, creating the set in the same shard
    /// critical section so concurrent first subscribers cannot lose updates.
    pub fn add_listener(&self, url: &Endpoint, listener: ListenerHandle) -> bool {
        self.subscribed
            .entry(url.clone())
            .or_default()
            .insert(listener)
    }

    pub fn remove_listener(&self, url: &Endpoint, listener: &ListenerHandle) -> bool {
        match self.subscribed.get_mut(url) {
            Some(mut listeners) => listeners.remove(listener),
            None => false,
        }
    }

    pub fn listeners(&self, url: &Endpoint) -> Vec<ListenerHandle> {
        self.subscribed
            .get(url)
            .map(|listeners| listeners.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribed(&self) -> HashMap<Endpoint, HashSet<ListenerHandle>> {
        self.subscribed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(Endpoint, Vec<ListenerHandle>)> {
        self.subscribed
            .iter()
            .map(|entry| {
                let listeners = entry.value().iter().cloned().collect();
                (entry.key().clone(), listeners)
            })
            .collect()
    }

    /// Replaces one category's list, then hands the subscription's full
    /// category map to `then` before the entry is unlocked. Concurrent
    /// replacements for the same url observe each other in order.
    pub fn replace_category<R>(
        &self,
        url: &Endpoint,
        category: String,
        urls: Vec<Endpoint>,
        then: impl FnOnce(&CategoryMap) -> R,
    ) -> R {
        let mut categories = self.notified.entry(url.clone()).or_default();
        categories.insert(category, urls);
        then(categories.value())
    }

    pub fn notified_for(&self, url: &Endpoint) -> Option<CategoryMap> {
        self.notified.get(url).map(|categories| categories.value().clone())
    }

    pub fn notified(&self) -> HashMap<Endpoint, CategoryMap> {
        self.notified
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
