//! Built-in check engine
//!
//! Evaluates the enabled [`CheckSpec`]s against one object and mirrors the
//! result into the `check_failed` gauge: a failing check sets its series to
//! 1, a passing check removes it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use serde_json::Value;
use tracing::{debug, info};

use super::checks::{is_deployment_like, CheckSpec};
use super::config::ChecksConfig;
use super::{MetricLabels, ValidationEngine, ValidationOutcome};
use crate::controller::metrics::{CheckGaugeFamily, CheckLabels};
use crate::controller::object::ObjectView;
use crate::{Error, Result};

pub struct CheckEngine {
    checks: RwLock<Vec<&'static CheckSpec>>,
    generation: AtomicU64,
    gauge: CheckGaugeFamily,
}

fn names(checks: &[&CheckSpec]) -> String {
    checks.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

impl CheckEngine {
    /// Builds an engine publishing into `gauge`; pass
    /// `metrics::CHECK_FAILED.clone()` to export through the global registry.
    pub fn new(config: &ChecksConfig, gauge: CheckGaugeFamily) -> Result<Self> {
        let checks = config.resolve()?;
        debug!("Enabled checks: {}", names(&checks));
        Ok(Self {
            checks: RwLock::new(checks),
            generation: AtomicU64::new(0),
            gauge,
        })
    }

    fn checks(&self) -> RwLockReadGuard<'_, Vec<&'static CheckSpec>> {
        self.checks.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enabled_checks(&self) -> Vec<&'static CheckSpec> {
        self.checks().clone()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.checks().iter().any(|c| c.name == name)
    }

    /// Swaps in the checks selected by `config`.
    ///
    /// Returns `Ok(false)` when the selection is unchanged. Otherwise every
    /// published series is cleared and the generation is bumped, so the
    /// scheduler validates all objects again under the new set. An invalid
    /// config leaves the current checks in place.
    pub fn reload(&self, config: &ChecksConfig) -> Result<bool> {
        let checks = config.resolve()?;
        let mut current = self.checks.write().unwrap_or_else(PoisonError::into_inner);
        if current.iter().map(|c| c.name).eq(checks.iter().map(|c| c.name)) {
            return Ok(false);
        }

        info!("Enabled checks changed to: {}", names(&checks));
        *current = checks;
        self.gauge.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Whether a deployment-like object is managed by another deployment-like
/// object (a ReplicaSet owned by a Deployment, a Pod owned by a ReplicaSet).
fn owned_by_deployment_like(object: &ObjectView<'_>) -> bool {
    object
        .metadata()
        .owner_references
        .iter()
        .flatten()
        .any(|owner| {
            let group = owner
                .api_version
                .split_once('/')
                .map(|(group, _)| group)
                .unwrap_or("");
            is_deployment_like(group, &owner.kind)
        })
}

fn scaled_to_zero(data: &Value) -> bool {
    data.pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .map(|replicas| replicas <= 0)
        .unwrap_or(false)
}

impl ValidationEngine for CheckEngine {
    fn supports(&self, group: &str, kind: &str) -> bool {
        self.checks().iter().any(|c| c.scope.matches(group, kind))
    }

    fn validate(&self, object: &ObjectView<'_>) -> Result<ValidationOutcome> {
        let name = object.name().ok_or_else(|| Error::EngineError {
            identity: format!("{} in namespace {:?}", object.resource(), object.namespace()),
            message: "object has no name".to_string(),
        })?;
        let data = object.data();
        if !data.is_object() {
            return Err(Error::EngineError {
                identity: format!("{} {}/{}", object.resource(), object.namespace(), name),
                message: "object body is not a JSON object".to_string(),
            });
        }

        let kind = object.kind();
        let namespace = object.namespace();
        if is_deployment_like(object.group(), kind) && owned_by_deployment_like(object) {
            debug!(kind, namespace, name, "Skipping object managed by its owner");
            return Ok(ValidationOutcome::Ignored);
        }

        let labels = MetricLabels::from_view(object);
        if scaled_to_zero(data) {
            debug!(kind, namespace, name, "Skipping object scaled to zero");
            self.delete_metrics(&labels);
            return Ok(ValidationOutcome::Ignored);
        }

        let checks = self.checks();
        let mut failed = 0;
        for check in checks
            .iter()
            .filter(|c| c.scope.matches(object.group(), kind))
        {
            let series = CheckLabels::new(check.name, &labels);
            match (check.evaluate)(kind, data) {
                Some(reason) => {
                    failed += 1;
                    self.gauge.get_or_create(&series).set(1);
                    info!(
                        check = check.name,
                        kind,
                        namespace,
                        name,
                        "{}. Remediation: {}",
                        reason,
                        check.remediation
                    );
                }
                None => {
                    self.gauge.remove(&series);
                }
            }
        }

        Ok(if failed > 0 {
            ValidationOutcome::NeedsImprovement
        } else {
            ValidationOutcome::Valid
        })
    }

    fn delete_metrics(&self, labels: &MetricLabels) {
        for check in self.checks().iter() {
            self.gauge.remove(&CheckLabels::new(check.name, labels));
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::object::ResourceType;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::core::DynamicObject;
    use prometheus_client::metrics::family::Family;
    use serde_json::json;

    fn deployments() -> ResourceType {
        ResourceType::new("apps", "v1", "Deployment", "deployments", true)
    }

    fn object(rt: &ResourceType, name: Option<&str>, data: Value) -> DynamicObject {
        let mut obj = DynamicObject::new("unused", &rt.api_resource()).data(data);
        obj.metadata.name = name.map(str::to_string);
        obj.metadata.namespace = Some("default".to_string());
        obj.metadata.uid = Some("uid-web".to_string());
        obj
    }

    fn workload(replicas: i64, pod_spec: Value) -> Value {
        json!({ "spec": { "replicas": replicas, "template": { "spec": pod_spec } } })
    }

    fn compliant_pod_spec() -> Value {
        json!({
            "securityContext": { "runAsNonRoot": true },
            "containers": [{
                "name": "app",
                "image": "nginx:1.25",
                "resources": { "requests": { "cpu": "100m" }, "limits": { "memory": "128Mi" } }
            }]
        })
    }

    fn series(check: &str) -> CheckLabels {
        CheckLabels {
            check: check.to_string(),
            namespace_uid: "ns-uid".to_string(),
            namespace: "default".to_string(),
            uid: "uid-web".to_string(),
            name: "web".to_string(),
            kind: "Deployment".to_string(),
        }
    }

    fn engine(gauge: &CheckGaugeFamily) -> CheckEngine {
        CheckEngine::new(&ChecksConfig::default(), gauge.clone()).unwrap()
    }

    #[test]
    fn test_supports_closed_kind_set() {
        let engine = engine(&Family::default());
        assert!(engine.supports("apps", "Deployment"));
        assert!(engine.supports("batch", "CronJob"));
        assert!(engine.supports("policy", "PodDisruptionBudget"));
        assert!(!engine.supports("", "ConfigMap"));
        assert!(!engine.supports("apps", "ControllerRevision"));
    }

    #[test]
    fn test_compliant_object_is_valid() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        let rt = deployments();
        let obj = object(&rt, Some("web"), workload(3, compliant_pod_spec()));

        let outcome = engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::Valid);
        assert!(!gauge.remove(&series("host-network")));
    }

    #[test]
    fn test_failing_check_sets_gauge_and_fixing_clears_it() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        let rt = deployments();

        let mut pod_spec = compliant_pod_spec();
        pod_spec["hostNetwork"] = json!(true);
        let failing = object(&rt, Some("web"), workload(2, pod_spec));
        let outcome = engine.validate(&ObjectView::new(&rt, &failing, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::NeedsImprovement);
        assert_eq!(gauge.get_or_create(&series("host-network")).get(), 1);

        let fixed = object(&rt, Some("web"), workload(2, compliant_pod_spec()));
        let outcome = engine.validate(&ObjectView::new(&rt, &fixed, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::Valid);
        assert!(!gauge.remove(&series("host-network")));
    }

    #[test]
    fn test_scaled_to_zero_deletes_metrics() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        let rt = deployments();
        gauge.get_or_create(&series("host-pid")).set(1);

        let obj = object(&rt, Some("web"), workload(0, json!({})));
        let outcome = engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::Ignored);
        assert!(!gauge.remove(&series("host-pid")));
    }

    #[test]
    fn test_owned_workload_ignored() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        let rt = ResourceType::new("apps", "v1", "ReplicaSet", "replicasets", true);
        let mut obj = object(&rt, Some("web-5d8f"), workload(1, json!({ "hostPID": true })));
        obj.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "web".to_string(),
            uid: "uid-web".to_string(),
            ..Default::default()
        }]);

        let outcome = engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::Ignored);
    }

    #[test]
    fn test_missing_name_is_engine_error() {
        let engine = engine(&Family::default());
        let rt = deployments();
        let obj = object(&rt, None, json!({ "spec": {} }));
        let err = engine.validate(&ObjectView::new(&rt, &obj, "")).unwrap_err();
        assert!(matches!(err, Error::EngineError { .. }));
    }

    #[test]
    fn test_non_object_body_is_engine_error() {
        let engine = engine(&Family::default());
        let rt = deployments();
        let obj = object(&rt, Some("web"), Value::Null);
        let err = engine.validate(&ObjectView::new(&rt, &obj, "")).unwrap_err();
        assert_eq!(err.metric_label(), "engine");
    }

    #[test]
    fn test_delete_metrics_clears_every_check() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        gauge.get_or_create(&series("host-ipc")).set(1);
        gauge.get_or_create(&series("run-as-non-root")).set(1);

        let labels = MetricLabels {
            namespace_uid: "ns-uid".to_string(),
            namespace: "default".to_string(),
            uid: "uid-web".to_string(),
            name: "web".to_string(),
            kind: "Deployment".to_string(),
        };
        engine.delete_metrics(&labels);

        assert!(!gauge.remove(&series("host-ipc")));
        assert!(!gauge.remove(&series("run-as-non-root")));
    }

    #[test]
    fn test_engines_do_not_share_private_gauges() {
        let first = Family::default();
        let second: CheckGaugeFamily = Family::default();
        let engine = engine(&first);
        let rt = deployments();
        let pod_spec = json!({ "hostIPC": true, "containers": [] });
        let obj = object(&rt, Some("web"), workload(1, pod_spec));

        engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert!(first.remove(&series("host-ipc")));
        assert!(!second.remove(&series("host-ipc")));
    }

    #[test]
    fn test_reload_swaps_checks_and_bumps_generation() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        let rt = deployments();
        let mut pod_spec = compliant_pod_spec();
        pod_spec["hostNetwork"] = json!(true);
        let obj = object(&rt, Some("web"), workload(2, pod_spec));
        engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert_eq!(engine.generation(), 0);

        let config = ChecksConfig::from_yaml("checks:\n  exclude: [host-network]\n").unwrap();
        assert!(engine.reload(&config).unwrap());
        assert_eq!(engine.generation(), 1);
        assert!(!engine.is_enabled("host-network"));
        // Every series from the old check set is gone.
        assert!(!gauge.remove(&series("host-network")));

        let outcome = engine.validate(&ObjectView::new(&rt, &obj, "ns-uid")).unwrap();
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn test_reload_with_same_selection_is_a_no_op() {
        let gauge = Family::default();
        let engine = engine(&gauge);
        gauge.get_or_create(&series("host-pid")).set(1);

        assert!(!engine.reload(&ChecksConfig::default()).unwrap());
        assert_eq!(engine.generation(), 0);
        assert!(gauge.remove(&series("host-pid")));
    }

    #[test]
    fn test_invalid_reload_keeps_current_checks() {
        let engine = engine(&Family::default());
        let config = ChecksConfig::from_yaml("checks:\n  include: [no-such-check]\n").unwrap();

        assert!(engine.reload(&config).is_err());
        assert_eq!(engine.generation(), 0);
        assert_eq!(engine.enabled_checks().len(), 10);
    }
}
