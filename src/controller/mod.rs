//! Controller module for cluster-wide validation
//! This module contains the reconciliation scheduler, resource discovery,
//! paginated listing and the validation dedup cache.

pub mod backoff;
pub mod cache;
pub mod client;
pub mod discovery;
pub mod metrics;
pub mod namespaces;
pub mod object;
pub mod pager;
pub mod scheduler;

pub use backoff::{calculate_backoff, jittered_interval, BackoffConfig};
pub use cache::{CacheEntry, CacheSet, ValidationCache};
pub use client::{ClusterClient, KubeClusterClient, ObjectPage};
pub use discovery::ResourceTypeDiscoverer;
pub use namespaces::NamespaceResolver;
pub use object::{Namespace, ObjectView, ResourceKey, ResourceType, ValidationIdentity};
pub use pager::list_pages;
pub use scheduler::{CycleReport, Scheduler, SchedulerState};
