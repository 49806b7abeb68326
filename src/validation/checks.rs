//! Built-in checks
//!
//! Every check looks at a single object in isolation. Workload checks
//! operate on the embedded pod template, wherever the kind keeps it.

use serde_json::Value;

/// API groups and kinds that carry a pod template.
const DEPLOYMENT_LIKE: &[(&str, &str)] = &[
    ("", "Pod"),
    ("", "ReplicationController"),
    ("apps", "Deployment"),
    ("extensions", "Deployment"),
    ("apps", "DaemonSet"),
    ("extensions", "DaemonSet"),
    ("apps", "StatefulSet"),
    ("apps", "ReplicaSet"),
    ("extensions", "ReplicaSet"),
    ("batch", "Job"),
    ("batch", "CronJob"),
    ("apps.openshift.io", "DeploymentConfig"),
];

/// Kinds with a `spec.replicas` field.
const REPLICATED: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "ReplicaSet",
    "ReplicationController",
    "DeploymentConfig",
];

/// Sysctl prefixes that are not namespaced or not safe to set per pod.
const UNSAFE_SYSCTL_PREFIXES: &[&str] = &[
    "kernel.msg",
    "kernel.sem",
    "kernel.shm",
    "fs.mqueue.",
    "net.",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckScope {
    DeploymentLike,
    PodDisruptionBudget,
}

impl CheckScope {
    pub fn matches(&self, group: &str, kind: &str) -> bool {
        match self {
            CheckScope::DeploymentLike => is_deployment_like(group, kind),
            CheckScope::PodDisruptionBudget => group == "policy" && kind == "PodDisruptionBudget",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckScope::DeploymentLike => "deployment-like",
            CheckScope::PodDisruptionBudget => "pod-disruption-budget",
        }
    }
}

pub fn is_deployment_like(group: &str, kind: &str) -> bool {
    DEPLOYMENT_LIKE.iter().any(|(g, k)| *g == group && *k == kind)
}

/// Returns `Some(reason)` when the object fails the check.
pub type Evaluate = fn(kind: &str, data: &Value) -> Option<String>;

pub struct CheckSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub remediation: &'static str,
    pub scope: CheckScope,
    pub default_enabled: bool,
    pub evaluate: Evaluate,
}

impl std::fmt::Debug for CheckSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckSpec")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("default_enabled", &self.default_enabled)
            .finish()
    }
}

pub static BUILT_IN_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        name: "host-ipc",
        description: "Alert on pods/deployment-likes with sharing host's IPC namespace",
        remediation: "Ensure the host's IPC namespace is not shared.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: host_ipc,
    },
    CheckSpec {
        name: "host-network",
        description: "Alert on pods/deployment-likes with sharing host's network namespace",
        remediation: "Ensure the host's network namespace is not shared.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: host_network,
    },
    CheckSpec {
        name: "host-pid",
        description: "Alert on pods/deployment-likes with sharing host's process namespace",
        remediation: "Ensure the host's process namespace is not shared.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: host_pid,
    },
    CheckSpec {
        name: "privileged-container",
        description: "Indicates when deployments have containers running in privileged mode.",
        remediation: "Do not run your container as privileged unless it is required.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: privileged_container,
    },
    CheckSpec {
        name: "privilege-escalation-container",
        description: "Alert on containers of allowing privilege escalation that could gain more privileges than its parent process.",
        remediation: "Ensure containers do not allow privilege escalation by setting allowPrivilegeEscalation=false, privileged=false and removing the CAP_SYS_ADMIN capability.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: privilege_escalation_container,
    },
    CheckSpec {
        name: "run-as-non-root",
        description: "Indicates when containers are not set to runAsNonRoot.",
        remediation: "Set runAsUser to a non-zero number and runAsNonRoot to true in your pod or container securityContext.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: run_as_non_root,
    },
    CheckSpec {
        name: "unsafe-sysctls",
        description: "Alert on deployments specifying unsafe sysctls that may lead to severe problems like wrong behavior of containers",
        remediation: "Ensure container does not allow unsafe allocation of system resources by removing unsafe sysctls configurations.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: unsafe_sysctls,
    },
    CheckSpec {
        name: "unset-cpu-requirements",
        description: "Indicates when containers do not have CPU requests set.",
        remediation: "Set CPU requests for your container based on its requirements.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: unset_cpu_requirements,
    },
    CheckSpec {
        name: "unset-memory-requirements",
        description: "Indicates when containers do not have memory limits set.",
        remediation: "Set memory limits for your container based on its requirements.",
        scope: CheckScope::DeploymentLike,
        default_enabled: true,
        evaluate: unset_memory_requirements,
    },
    CheckSpec {
        name: "pdb-max-unavailable",
        description: "Indicates when a PodDisruptionBudget has a maxUnavailable value that will always prevent disruptions of pods.",
        remediation: "Change the PodDisruptionBudget to have maxUnavailable set to a value greater than 0.",
        scope: CheckScope::PodDisruptionBudget,
        default_enabled: true,
        evaluate: pdb_max_unavailable,
    },
    CheckSpec {
        name: "latest-tag",
        description: "Indicates when a deployment-like object is running a container with a floating image tag, \"latest\" or none.",
        remediation: "Use a container image with a specific tag other than latest.",
        scope: CheckScope::DeploymentLike,
        default_enabled: false,
        evaluate: latest_tag,
    },
    CheckSpec {
        name: "minimum-three-replicas",
        description: "Indicates when a deployment uses less than three replicas.",
        remediation: "Increase the number of replicas in your deployment to at least three to increase fault tolerance.",
        scope: CheckScope::DeploymentLike,
        default_enabled: false,
        evaluate: minimum_three_replicas,
    },
];

pub fn find(name: &str) -> Option<&'static CheckSpec> {
    BUILT_IN_CHECKS.iter().find(|check| check.name == name)
}

/// The pod spec embedded in a workload, if the kind has one.
pub fn pod_spec<'a>(kind: &str, data: &'a Value) -> Option<&'a Value> {
    let spec = data.get("spec")?;
    match kind {
        "Pod" => Some(spec),
        "CronJob" => spec.pointer("/jobTemplate/spec/template/spec"),
        _ => spec.pointer("/template/spec"),
    }
}

/// Regular and init containers of a pod spec.
fn containers(pod_spec: &Value) -> impl Iterator<Item = &Value> {
    ["containers", "initContainers"]
        .into_iter()
        .filter_map(|field| pod_spec.get(field).and_then(Value::as_array))
        .flatten()
}

fn container_name(container: &Value) -> &str {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}

fn flag(value: &Value, pointer: &str) -> bool {
    value
        .pointer(pointer)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Quantity is absent or zero.
fn quantity_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Number(n)) => n.as_f64().map(|v| v == 0.0).unwrap_or(true),
        Some(Value::String(s)) => {
            let digits = s.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            digits.is_empty() || digits.parse::<f64>().map(|v| v == 0.0).unwrap_or(false)
        }
        Some(_) => true,
    }
}

/// First container violating `fails`, formatted with `message`.
fn first_container(
    kind: &str,
    data: &Value,
    fails: impl Fn(&Value, &Value) -> bool,
    message: &str,
) -> Option<String> {
    let spec = pod_spec(kind, data)?;
    containers(spec)
        .find(|&container| fails(spec, container))
        .map(|container| format!("container \"{}\" {}", container_name(container), message))
}

fn host_ipc(kind: &str, data: &Value) -> Option<String> {
    let spec = pod_spec(kind, data)?;
    flag(spec, "/hostIPC")
        .then(|| "resource shares host's IPC namespace (via hostIPC=true)".to_string())
}

fn host_network(kind: &str, data: &Value) -> Option<String> {
    let spec = pod_spec(kind, data)?;
    flag(spec, "/hostNetwork")
        .then(|| "resource shares host's network namespace (via hostNetwork=true)".to_string())
}

fn host_pid(kind: &str, data: &Value) -> Option<String> {
    let spec = pod_spec(kind, data)?;
    flag(spec, "/hostPID")
        .then(|| "object shares the host's process namespace (via hostPID=true)".to_string())
}

fn privileged_container(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |_, c| flag(c, "/securityContext/privileged"),
        "is privileged",
    )
}

fn privilege_escalation_container(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |_, c| {
            let adds_sys_admin = c
                .pointer("/securityContext/capabilities/add")
                .and_then(Value::as_array)
                .map(|caps| {
                    caps.iter()
                        .filter_map(Value::as_str)
                        .any(|cap| cap == "SYS_ADMIN" || cap == "CAP_SYS_ADMIN")
                })
                .unwrap_or(false);
            flag(c, "/securityContext/allowPrivilegeEscalation")
                || flag(c, "/securityContext/privileged")
                || adds_sys_admin
        },
        "allows privilege escalation",
    )
}

fn run_as_non_root(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |pod, c| {
            // Container securityContext overrides the pod-level one.
            let non_root = c
                .pointer("/securityContext/runAsNonRoot")
                .or_else(|| pod.pointer("/securityContext/runAsNonRoot"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let user = c
                .pointer("/securityContext/runAsUser")
                .or_else(|| pod.pointer("/securityContext/runAsUser"))
                .and_then(Value::as_i64);
            !(non_root || user.map(|uid| uid > 0).unwrap_or(false))
        },
        "is not set to runAsNonRoot",
    )
}

fn unsafe_sysctls(kind: &str, data: &Value) -> Option<String> {
    let spec = pod_spec(kind, data)?;
    spec.pointer("/securityContext/sysctls")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|s| s.get("name").and_then(Value::as_str))
        .find(|name| UNSAFE_SYSCTL_PREFIXES.iter().any(|p| name.starts_with(p)))
        .map(|name| format!("resource specifies unsafe sysctl \"{}\"", name))
}

fn unset_cpu_requirements(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |_, c| quantity_unset(c.pointer("/resources/requests/cpu")),
        "has cpu request 0",
    )
}

fn unset_memory_requirements(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |_, c| quantity_unset(c.pointer("/resources/limits/memory")),
        "has memory limit 0",
    )
}

fn pdb_max_unavailable(_kind: &str, data: &Value) -> Option<String> {
    let max = data.pointer("/spec/maxUnavailable")?;
    let zero = match max {
        Value::Number(n) => n.as_i64() == Some(0),
        Value::String(s) => s.trim() == "0" || s.trim() == "0%",
        _ => false,
    };
    zero.then(|| "MaxUnavailable is set to 0".to_string())
}

fn latest_tag(kind: &str, data: &Value) -> Option<String> {
    first_container(
        kind,
        data,
        |_, c| {
            let image = c.get("image").and_then(Value::as_str).unwrap_or_default();
            if image.contains('@') {
                return false;
            }
            let last = image.rsplit('/').next().unwrap_or(image);
            match last.split_once(':') {
                Some((_, tag)) => tag == "latest",
                None => true,
            }
        },
        "uses a floating image tag",
    )
}

fn minimum_three_replicas(kind: &str, data: &Value) -> Option<String> {
    if !REPLICATED.contains(&kind) {
        return None;
    }
    let replicas = data
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    (replicas < 3).then(|| {
        format!(
            "object has {} replica(s) but at least 3 are required",
            replicas
        )
    })
}
