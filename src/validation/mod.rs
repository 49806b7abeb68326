//! Validation engine interface and the built-in check engine
//!
//! The reconciliation core treats the engine as a black box: it asks which
//! kinds are supported, validates one object at a time and asks for metric
//! cleanup when an object disappears.

pub mod checks;
pub mod config;
pub mod engine;
pub mod reload;

use serde::{Deserialize, Serialize};

use crate::controller::cache::CacheEntry;
use crate::controller::object::{ObjectView, ValidationIdentity};
use crate::Result;

pub use engine::CheckEngine;
pub use reload::watch_checks_config;

/// Result of validating one object. The scheduler stores it in the cache
/// without inspecting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationOutcome {
    /// Every check in scope passed
    Valid,
    /// At least one check failed
    NeedsImprovement,
    /// The object is deliberately not evaluated (owned by another workload,
    /// scaled to zero, ...)
    Ignored,
}

/// Labels identifying one object's metric series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct MetricLabels {
    pub namespace_uid: String,
    pub namespace: String,
    pub uid: String,
    pub name: String,
    pub kind: String,
}

impl MetricLabels {
    pub fn from_view(object: &ObjectView<'_>) -> Self {
        Self {
            namespace_uid: object.namespace_uid().to_string(),
            namespace: object.namespace().to_string(),
            uid: object.uid().to_string(),
            name: object.name().unwrap_or_default().to_string(),
            kind: object.kind().to_string(),
        }
    }

    /// Rebuilds the labels of an object that is no longer listed.
    pub fn from_cache_entry(identity: &ValidationIdentity, entry: &CacheEntry) -> Self {
        Self {
            namespace_uid: entry.namespace_uid.clone(),
            namespace: identity.namespace.clone(),
            uid: entry.uid.clone(),
            name: identity.name.clone(),
            kind: identity.kind.clone(),
        }
    }
}

pub trait ValidationEngine: Send + Sync {
    /// Whether any check applies to objects of this group and kind.
    fn supports(&self, group: &str, kind: &str) -> bool;

    /// Validates one object and publishes its per-check metrics.
    fn validate(&self, object: &ObjectView<'_>) -> Result<ValidationOutcome>;

    /// Removes every metric series published for the object.
    fn delete_metrics(&self, labels: &MetricLabels);

    /// Bumped whenever the engine's rules change; outcomes cached under an
    /// older generation are stale.
    fn generation(&self) -> u64 {
        0
    }
}
