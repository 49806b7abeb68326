//! Validation dedup cache
//!
//! One [`ValidationCache`] per resource kind, keyed by object identity. An
//! entry proves "already validated" only while its resource version equals
//! the one currently listed; any mismatch evicts it.
//!
//! Caches are sharded by group and kind only. When discovery moves a kind to
//! a new preferred version the existing entries are carried over, since the
//! objects and their resource versions are the same.

use std::collections::{HashMap, HashSet};

use super::object::{ResourceKey, ResourceType, ValidationIdentity};
use crate::validation::ValidationOutcome;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub resource_version: String,
    pub uid: String,
    /// Namespace UID at validation time, kept so metric labels can be
    /// rebuilt after the namespace is gone.
    pub namespace_uid: String,
    pub outcome: ValidationOutcome,
}

#[derive(Debug, Default)]
pub struct ValidationCache {
    /// API version the identities were recorded under
    version: String,
    entries: HashMap<ValidationIdentity, CacheEntry>,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Re-keys every entry under `version`. Returns the number of entries
    /// carried over.
    pub fn adopt_version(&mut self, version: &str) -> usize {
        if self.version == version {
            return 0;
        }
        self.version = version.to_string();
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .map(|(mut identity, entry)| {
                identity.version = version.to_string();
                (identity, entry)
            })
            .collect();
        self.entries.len()
    }

    /// True when the object has never been validated or has changed since.
    /// A stale entry is removed as part of the check.
    pub fn needs_validation(
        &mut self,
        identity: &ValidationIdentity,
        resource_version: &str,
    ) -> bool {
        match self.entries.get(identity) {
            Some(entry) if entry.resource_version == resource_version => false,
            Some(_) => {
                self.entries.remove(identity);
                true
            }
            None => true,
        }
    }

    pub fn store(&mut self, identity: ValidationIdentity, entry: CacheEntry) {
        self.entries.insert(identity, entry);
    }

    /// Read-only lookup; never evicts.
    pub fn retrieve(&self, identity: &ValidationIdentity) -> Option<&CacheEntry> {
        self.entries.get(identity)
    }

    pub fn remove(&mut self, identity: &ValidationIdentity) -> Option<CacheEntry> {
        self.entries.remove(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &ValidationIdentity> {
        self.entries.keys()
    }

    /// Removes every entry whose identity was not observed in the latest
    /// full listing of this kind and returns them, so metrics for deleted
    /// objects can be cleared.
    pub fn evict_unobserved(
        &mut self,
        observed: &HashSet<ValidationIdentity>,
    ) -> Vec<(ValidationIdentity, CacheEntry)> {
        let gone: Vec<ValidationIdentity> = self
            .entries
            .keys()
            .filter(|id| !observed.contains(*id))
            .cloned()
            .collect();

        gone.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    fn drain(&mut self) -> Vec<(ValidationIdentity, CacheEntry)> {
        self.entries.drain().collect()
    }
}

/// Per-kind caches owned by one scheduler.
#[derive(Debug, Default)]
pub struct CacheSet {
    caches: HashMap<ResourceKey, ValidationCache>,
}

impl CacheSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `resource`, created on first use. Entries recorded
    /// under another version of the same kind are re-keyed to
    /// `resource.version`.
    pub fn cache_for(&mut self, resource: &ResourceType) -> &mut ValidationCache {
        let cache = self.caches.entry(resource.key()).or_default();
        cache.adopt_version(&resource.version);
        cache
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ValidationCache> {
        self.caches.get(key)
    }

    pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut ValidationCache> {
        self.caches.get_mut(key)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ResourceKey> {
        self.caches.keys()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Total number of entries across all kinds.
    pub fn total_entries(&self) -> usize {
        self.caches.values().map(ValidationCache::len).sum()
    }

    /// Drops every cache and returns the entries they held.
    pub fn clear(&mut self) -> Vec<(ResourceKey, Vec<(ValidationIdentity, CacheEntry)>)> {
        self.caches
            .drain()
            .map(|(key, mut cache)| (key, cache.drain()))
            .collect()
    }

    /// Drops the caches of kinds not in `live` and returns their entries.
    pub fn retain_kinds(
        &mut self,
        live: &HashSet<ResourceKey>,
    ) -> Vec<(ResourceKey, Vec<(ValidationIdentity, CacheEntry)>)> {
        let vanished: Vec<ResourceKey> = self
            .caches
            .keys()
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();

        vanished
            .into_iter()
            .filter_map(|key| {
                self.caches
                    .remove(&key)
                    .map(|mut cache| (key, cache.drain()))
            })
            .collect()
    }
}
