//! Reconciliation scheduler
//!
//! Drives the periodic scan: discover resource types, resolve namespaces,
//! list every supported object page by page, validate what changed and
//! clear metrics of objects that disappeared. One cycle runs at a time;
//! a failed cycle is retried with bounded exponential backoff and
//! exhausting the retries stops the scheduler with an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{pin_mut, TryStreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::{calculate_backoff, jittered_interval, TICK_JITTER_FACTOR};
use super::cache::{CacheEntry, CacheSet};
use super::client::ClusterClient;
use super::discovery::ResourceTypeDiscoverer;
use super::metrics;
use super::namespaces::NamespaceResolver;
use super::object::{ObjectView, ResourceKey, ResourceType};
use super::pager::list_pages;
use crate::config::ScannerConfig;
use crate::validation::{MetricLabels, ValidationEngine};
use crate::{Error, Result};

/// Observable scheduler state, published through [`Scheduler::subscribe`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SchedulerState {
    Idle,
    Running {
        cycle: u64,
        attempt: u32,
    },
    Backoff {
        cycle: u64,
        attempt: u32,
        delay: Duration,
    },
    WaitingForTick {
        completed_cycles: u64,
        last_completed: DateTime<Utc>,
    },
    Stopped,
}

impl SchedulerState {
    /// Number of cycles known to have completed when this state was set.
    pub fn completed_cycles(&self) -> u64 {
        match self {
            SchedulerState::Running { cycle, .. } | SchedulerState::Backoff { cycle, .. } => {
                cycle.saturating_sub(1)
            }
            SchedulerState::WaitingForTick {
                completed_cycles, ..
            } => *completed_cycles,
            SchedulerState::Idle | SchedulerState::Stopped => 0,
        }
    }
}

/// Summary of one successful cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub resource_types: usize,
    pub namespaces: usize,
    pub objects_seen: u64,
    pub validated: u64,
    pub cache_hits: u64,
    pub engine_errors: u64,
    pub deleted: u64,
}

pub struct Scheduler {
    client: Arc<dyn ClusterClient>,
    engine: Arc<dyn ValidationEngine>,
    config: ScannerConfig,
    namespaces: NamespaceResolver,
    caches: CacheSet,
    state: watch::Sender<SchedulerState>,
    completed_cycles: u64,
    /// Engine generation the cached outcomes belong to
    engine_generation: u64,
}

impl Scheduler {
    /// Fails when the configuration is invalid, including an exclusion
    /// pattern that does not compile.
    pub fn new(
        client: Arc<dyn ClusterClient>,
        engine: Arc<dyn ValidationEngine>,
        config: ScannerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let namespaces = NamespaceResolver::new(config.namespace_ignore_pattern.as_deref())?;
        let (state, _) = watch::channel(SchedulerState::Idle);
        let engine_generation = engine.generation();

        Ok(Self {
            client,
            engine,
            config,
            namespaces,
            caches: CacheSet::new(),
            state,
            completed_cycles: 0,
            engine_generation,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs cycles until `shutdown` is cancelled or a cycle exhausts its
    /// retries. Cancellation is a clean stop and returns `Ok(())`.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting reconciliation scheduler (interval {:?}, page size {})",
            self.config.interval, self.config.page_size
        );
        let result = self.run_until_stopped(&shutdown).await;
        self.state.send_replace(SchedulerState::Stopped);

        match &result {
            Ok(()) => info!("Reconciliation scheduler stopped"),
            Err(e) => error!("Reconciliation scheduler failed: {}", e),
        }
        result
    }

    async fn run_until_stopped(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let started = Instant::now();
            let Some(report) = self.run_cycle_with_retry(shutdown).await? else {
                return Ok(());
            };
            info!(
                cycle = self.completed_cycles,
                resource_types = report.resource_types,
                namespaces = report.namespaces,
                objects = report.objects_seen,
                validated = report.validated,
                cache_hits = report.cache_hits,
                engine_errors = report.engine_errors,
                deleted = report.deleted,
                "Reconciliation cycle completed in {:?}",
                started.elapsed()
            );

            // Measured from the cycle start: an overrunning cycle starts the
            // next one immediately instead of overlapping it.
            let next_tick = started + jittered_interval(self.config.interval, TICK_JITTER_FACTOR);
            self.state.send_replace(SchedulerState::WaitingForTick {
                completed_cycles: self.completed_cycles,
                last_completed: Utc::now(),
            });
            debug!(
                "Next cycle in {:?}",
                next_tick.saturating_duration_since(Instant::now())
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(next_tick) => {}
            }
        }
    }

    /// One cycle with retries. `Ok(None)` means cancelled.
    async fn run_cycle_with_retry(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<CycleReport>> {
        let cycle = self.completed_cycles + 1;
        let max_attempts = self.config.backoff.max_attempts;
        let mut attempt = 1;

        loop {
            self.state
                .send_replace(SchedulerState::Running { cycle, attempt });
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                result = self.run_cycle() => result,
            };
            let elapsed = started.elapsed().as_secs_f64();

            let err = match result {
                Ok(report) => {
                    metrics::observe_cycle_duration_seconds(true, elapsed);
                    self.completed_cycles += 1;
                    return Ok(Some(report));
                }
                Err(err) => err,
            };

            metrics::observe_cycle_duration_seconds(false, elapsed);
            metrics::inc_cycle_error(err.metric_label());

            if !err.is_cycle_retriable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = calculate_backoff(attempt - 1, &self.config.backoff);
            warn!(
                cycle,
                attempt, "Reconciliation cycle failed, retrying in {:?}: {}", delay, err
            );
            self.state.send_replace(SchedulerState::Backoff {
                cycle,
                attempt,
                delay,
            });

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// A single discovery → namespaces → list → validate pass, without
    /// retries.
    ///
    /// A listing failure aborts the cycle; objects processed before it keep
    /// their cache entries.
    #[instrument(skip(self), fields(cycle = self.completed_cycles + 1))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let client = Arc::clone(&self.client);
        let engine = Arc::clone(&self.engine);

        self.drop_caches_on_engine_change();

        let resources = ResourceTypeDiscoverer::discover(client.as_ref(), engine.as_ref()).await?;
        self.namespaces.reset();
        info!("Starting reconciliation cycle over {} resource types", resources.len());

        let mut report = CycleReport {
            resource_types: resources.len(),
            ..Default::default()
        };
        for resource in &resources {
            self.scan_resource(client.as_ref(), engine.as_ref(), resource, &mut report)
                .await?;
        }

        let live: HashSet<ResourceKey> = resources.iter().map(ResourceType::key).collect();
        for (key, entries) in self.caches.retain_kinds(&live) {
            let kind = key.to_string();
            for (identity, entry) in &entries {
                engine.delete_metrics(&MetricLabels::from_cache_entry(identity, entry));
            }
            info!(
                "Resource type {} is no longer served, dropped {} cached objects",
                kind,
                entries.len()
            );
            report.deleted += entries.len() as u64;
            metrics::add_objects_deleted(&kind, entries.len() as u64);
            metrics::remove_cached_objects(&kind);
        }

        Ok(report)
    }

    /// Cached outcomes were produced by the previous check set; once the
    /// engine reports a new generation every object is validated again.
    fn drop_caches_on_engine_change(&mut self) {
        let generation = self.engine.generation();
        if generation == self.engine_generation {
            return;
        }
        self.engine_generation = generation;

        let mut dropped = 0;
        for (key, entries) in self.caches.clear() {
            for (identity, entry) in &entries {
                self.engine
                    .delete_metrics(&MetricLabels::from_cache_entry(identity, entry));
            }
            dropped += entries.len();
            metrics::remove_cached_objects(&key.to_string());
        }
        info!(
            "Check set changed (generation {}), dropped {} cached validations",
            generation, dropped
        );
    }

    /// Lists and validates every object of one resource type, then evicts
    /// cache entries for objects that were not listed.
    #[instrument(skip_all, fields(kind = %resource))]
    async fn scan_resource(
        &mut self,
        client: &dyn ClusterClient,
        engine: &dyn ValidationEngine,
        resource: &ResourceType,
        report: &mut CycleReport,
    ) -> Result<()> {
        // (namespace, namespace UID) pairs to list; None lists cluster-wide.
        let scopes: Vec<(Option<String>, String)> = if resource.namespaced {
            let namespaces = self.namespaces.resolve(client).await?;
            report.namespaces = namespaces.len();
            namespaces
                .iter()
                .map(|ns| (Some(ns.name.clone()), ns.uid.clone()))
                .collect()
        } else {
            vec![(None, String::new())]
        };

        let key = resource.key();
        if let Some(cache) = self.caches.get(&key) {
            if cache.version() != resource.version {
                info!(
                    "{} moved from version {} to {}, keeping {} cached objects",
                    key,
                    cache.version(),
                    resource.version,
                    cache.len()
                );
            }
        }
        let mut observed = HashSet::new();
        let (mut validated, mut hits, mut failures) = (0u64, 0u64, 0u64);

        for (namespace, namespace_uid) in &scopes {
            let pages = list_pages(client, resource, namespace.as_deref(), self.config.page_size);
            pin_mut!(pages);

            while let Some(page) = pages.try_next().await? {
                let cache = self.caches.cache_for(resource);
                for object in &page {
                    report.objects_seen += 1;
                    let view = ObjectView::new(resource, object, namespace_uid);
                    let Some(identity) = view.identity() else {
                        warn!(namespace = view.namespace(), "Skipping object without a name");
                        continue;
                    };
                    observed.insert(identity.clone());

                    if !cache.needs_validation(&identity, view.resource_version()) {
                        hits += 1;
                        debug!(object = %identity, "Unchanged since last validation");
                        continue;
                    }

                    match engine.validate(&view) {
                        Ok(outcome) => {
                            validated += 1;
                            debug!(object = %identity, ?outcome, "Validated");
                            cache.store(
                                identity,
                                CacheEntry {
                                    resource_version: view.resource_version().to_string(),
                                    uid: view.uid().to_string(),
                                    namespace_uid: namespace_uid.clone(),
                                    outcome,
                                },
                            );
                        }
                        Err(e) => {
                            // Any entry was evicted above; nothing else would
                            // clear series from an earlier validation.
                            failures += 1;
                            warn!(object = %identity, "Skipping object: {}", e);
                            engine.delete_metrics(&MetricLabels::from_view(&view));
                        }
                    }
                }
            }
        }

        let cache = self.caches.cache_for(resource);
        let evicted = cache.evict_unobserved(&observed);
        for (identity, entry) in &evicted {
            debug!(object = %identity, "Object no longer listed, deleting its metrics");
            engine.delete_metrics(&MetricLabels::from_cache_entry(identity, entry));
        }
        let cached = cache.len();

        let kind = key.to_string();
        metrics::add_objects_validated(&kind, validated);
        metrics::add_cache_hits(&kind, hits);
        metrics::add_engine_errors(&kind, failures);
        metrics::add_objects_deleted(&kind, evicted.len() as u64);
        metrics::set_cached_objects(&kind, cached);

        report.validated += validated;
        report.cache_hits += hits;
        report.engine_errors += failures;
        report.deleted += evicted.len() as u64;
        Ok(())
    }
}
