//! Prometheus metrics for the validation operator
//!
//! # Exported metrics
//! - `validation_operator_check_failed` (gauge): 1 per failing check, labeled by check/namespace_uid/namespace/uid/name/kind.
//! - `validation_operator_cycle_duration_seconds` (histogram): reconciliation cycle duration labeled by outcome.
//! - `validation_operator_cycle_errors_total` (counter): failed cycle attempts labeled by error kind.
//! - `validation_operator_objects_validated_total` (counter): objects sent to the engine, labeled by resource kind.
//! - `validation_operator_cache_hits_total` (counter): objects skipped as unchanged, labeled by resource kind.
//! - `validation_operator_engine_errors_total` (counter): engine failures, labeled by resource kind.
//! - `validation_operator_objects_deleted_total` (counter): cache entries evicted for vanished objects, labeled by resource kind.
//! - `validation_operator_cached_objects` (gauge): cache size labeled by resource kind.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::validation::MetricLabels;

/// Labels for the per-check failure gauge
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Check name, e.g. "host-network"
    pub check: String,
    pub namespace_uid: String,
    pub namespace: String,
    pub uid: String,
    pub name: String,
    pub kind: String,
}

impl CheckLabels {
    pub fn new(check: &str, object: &MetricLabels) -> Self {
        Self {
            check: check.to_string(),
            namespace_uid: object.namespace_uid.clone(),
            namespace: object.namespace.clone(),
            uid: object.uid.clone(),
            name: object.name.clone(),
            kind: object.kind.clone(),
        }
    }
}

/// Labels for per-resource-kind counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    /// Resource kind, e.g. "Deployment.apps"
    pub kind: String,
}

/// Labels for cycle metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    /// "success" or "failure"
    pub outcome: String,
}

/// Labels for cycle error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error kind/category, e.g. "discovery", "list"
    pub kind: String,
}

pub type CheckGaugeFamily = Family<CheckLabels, Gauge<i64, AtomicI64>>;

/// Gauge set to 1 for every failing check of every object
pub static CHECK_FAILED: Lazy<CheckGaugeFamily> = Lazy::new(Family::default);

/// Histogram tracking reconciliation cycle duration (seconds)
pub static CYCLE_DURATION_SECONDS: Lazy<Family<CycleLabels, Histogram>> = Lazy::new(|| {
    fn cycle_histogram() -> Histogram {
        // 10ms .. ~5.5min across 16 buckets.
        Histogram::new(exponential_buckets(0.01, 2.0, 16))
    }

    Family::new_with_constructor(cycle_histogram)
});

/// Counter tracking failed cycle attempts
pub static CYCLE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static OBJECTS_VALIDATED_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CACHE_HITS_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ENGINE_ERRORS_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static OBJECTS_DELETED_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking validation cache size per kind
pub static CACHED_OBJECTS: Lazy<Family<KindLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry. Counter names get their `_total` suffix from
/// the encoder.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "validation_operator_check_failed",
        "Set to 1 while an object fails a validation check",
        CHECK_FAILED.clone(),
    );
    registry.register(
        "validation_operator_cycle_duration_seconds",
        "Duration of reconciliation cycles in seconds",
        CYCLE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "validation_operator_cycle_errors",
        "Number of failed reconciliation cycle attempts",
        CYCLE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "validation_operator_objects_validated",
        "Number of objects sent to the validation engine",
        OBJECTS_VALIDATED_TOTAL.clone(),
    );
    registry.register(
        "validation_operator_cache_hits",
        "Number of objects skipped because their resource version was unchanged",
        CACHE_HITS_TOTAL.clone(),
    );
    registry.register(
        "validation_operator_engine_errors",
        "Number of objects the validation engine failed to evaluate",
        ENGINE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "validation_operator_objects_deleted",
        "Number of cache entries evicted because the object disappeared",
        OBJECTS_DELETED_TOTAL.clone(),
    );
    registry.register(
        "validation_operator_cached_objects",
        "Number of objects held in the validation cache",
        CACHED_OBJECTS.clone(),
    );

    registry
});

fn kind_labels(kind: &str) -> KindLabels {
    KindLabels {
        kind: kind.to_string(),
    }
}

/// Record the duration of a finished cycle attempt.
pub fn observe_cycle_duration_seconds(success: bool, seconds: f64) {
    let labels = CycleLabels {
        outcome: if success { "success" } else { "failure" }.to_string(),
    };
    CYCLE_DURATION_SECONDS.get_or_create(&labels).observe(seconds);
}

/// Increment the cycle error counter.
pub fn inc_cycle_error(kind: &str) {
    let labels = ErrorLabels {
        kind: kind.to_string(),
    };
    CYCLE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn add_objects_validated(kind: &str, count: u64) {
    OBJECTS_VALIDATED_TOTAL
        .get_or_create(&kind_labels(kind))
        .inc_by(count);
}

pub fn add_cache_hits(kind: &str, count: u64) {
    CACHE_HITS_TOTAL.get_or_create(&kind_labels(kind)).inc_by(count);
}

pub fn add_engine_errors(kind: &str, count: u64) {
    ENGINE_ERRORS_TOTAL
        .get_or_create(&kind_labels(kind))
        .inc_by(count);
}

pub fn add_objects_deleted(kind: &str, count: u64) {
    OBJECTS_DELETED_TOTAL
        .get_or_create(&kind_labels(kind))
        .inc_by(count);
}

pub fn set_cached_objects(kind: &str, count: usize) {
    CACHED_OBJECTS
        .get_or_create(&kind_labels(kind))
        .set(count as i64);
}

/// Drop the cache size series of a kind that is no longer served.
pub fn remove_cached_objects(kind: &str) {
    CACHED_OBJECTS.remove(&kind_labels(kind));
}
