//! Resource types, namespaces and object identities
//!
//! Every scanned object is an untyped `DynamicObject`: the set of kinds is
//! only known at runtime through discovery, so nothing here depends on a
//! concrete schema.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

/// A served API resource type, produced fresh by every discovery pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// URL path segment used to list the resource (e.g. "deployments")
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceType {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    /// Key used to shard validation caches by kind. Stable across changes
    /// of the preferred version.
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: self.group.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Group and kind identifying one per-kind validation cache, rendered the
/// way kubectl names resources (`Deployment.apps`, `Pod`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// A cluster namespace as seen by one reconciliation cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub uid: String,
}

impl Namespace {
    pub fn new(name: &str, uid: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.to_string(),
        }
    }
}

/// Identity of one logical object across reconciliation cycles.
///
/// Kubernetes guarantees name uniqueness within namespace + kind, so two
/// objects with equal identities are the same object observed at different
/// points in time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidationIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Empty for cluster-scoped objects
    pub namespace: String,
    pub name: String,
}

impl ValidationIdentity {
    pub fn new(resource: &ResourceType, namespace: &str, name: &str) -> Self {
        Self {
            group: resource.group.clone(),
            version: resource.version.clone(),
            kind: resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ValidationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gv = if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        if self.namespace.is_empty() {
            write!(f, "{}/{} {}", gv, self.kind, self.name)
        } else {
            write!(f, "{}/{} {}/{}", gv, self.kind, self.namespace, self.name)
        }
    }
}

/// Read-only view of one listed object together with the resource type it
/// was listed as and the UID of its namespace.
///
/// List responses do not reliably carry `apiVersion`/`kind` on their items,
/// so the kind always comes from the resource type, never from the object.
#[derive(Clone, Copy, Debug)]
pub struct ObjectView<'a> {
    resource: &'a ResourceType,
    object: &'a DynamicObject,
    namespace_uid: &'a str,
}

impl<'a> ObjectView<'a> {
    pub fn new(
        resource: &'a ResourceType,
        object: &'a DynamicObject,
        namespace_uid: &'a str,
    ) -> Self {
        Self {
            resource,
            object,
            namespace_uid,
        }
    }

    pub fn resource(&self) -> &'a ResourceType {
        self.resource
    }

    pub fn kind(&self) -> &'a str {
        &self.resource.kind
    }

    pub fn group(&self) -> &'a str {
        &self.resource.group
    }

    pub fn namespace(&self) -> &'a str {
        self.object.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> Option<&'a str> {
        self.object
            .metadata
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    pub fn uid(&self) -> &'a str {
        self.object.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> &'a str {
        self.object
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or_default()
    }

    pub fn namespace_uid(&self) -> &'a str {
        self.namespace_uid
    }

    pub fn metadata(&self) -> &'a ObjectMeta {
        &self.object.metadata
    }

    /// Everything outside `metadata` (spec, status, data, ...).
    pub fn data(&self) -> &'a serde_json::Value {
        &self.object.data
    }

    /// `None` when the object has no name and so cannot be tracked.
    pub fn identity(&self) -> Option<ValidationIdentity> {
        self.name()
            .map(|name| ValidationIdentity::new(self.resource, self.namespace(), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment_type() -> ResourceType {
        ResourceType::new("apps", "v1", "Deployment", "deployments", true)
    }

    fn dynamic(name: Option<&str>, namespace: Option<&str>, rv: &str) -> DynamicObject {
        let mut obj = DynamicObject::new("unused", &deployment_type().api_resource())
            .data(json!({ "spec": { "replicas": 2 } }));
        obj.metadata.name = name.map(str::to_string);
        obj.metadata.namespace = namespace.map(str::to_string);
        obj.metadata.uid = Some("uid-1".to_string());
        obj.metadata.resource_version = Some(rv.to_string());
        obj
    }

    #[test]
    fn test_api_version_core_group() {
        let pods = ResourceType::new("", "v1", "Pod", "pods", true);
        assert_eq!(pods.api_version(), "v1");
        assert_eq!(pods.to_string(), "v1/Pod");
        assert_eq!(deployment_type().to_string(), "apps/v1/Deployment");
    }

    #[test]
    fn test_resource_key_display() {
        assert_eq!(deployment_type().key().to_string(), "Deployment.apps");
        let ns = ResourceType::new("", "v1", "Namespace", "namespaces", false);
        assert_eq!(ns.key().to_string(), "Namespace");

        let beta = ResourceType::new("apps", "v1beta2", "Deployment", "deployments", true);
        assert_eq!(beta.key(), deployment_type().key());
    }

    #[test]
    fn test_api_resource_uses_plural() {
        let ar = deployment_type().api_resource();
        assert_eq!(ar.plural, "deployments");
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.kind, "Deployment");
    }

    #[test]
    fn test_view_accessors() {
        let rt = deployment_type();
        let obj = dynamic(Some("web"), Some("default"), "42");
        let view = ObjectView::new(&rt, &obj, "ns-uid");
        assert_eq!(view.kind(), "Deployment");
        assert_eq!(view.group(), "apps");
        assert_eq!(view.name(), Some("web"));
        assert_eq!(view.namespace(), "default");
        assert_eq!(view.uid(), "uid-1");
        assert_eq!(view.resource_version(), "42");
        assert_eq!(view.namespace_uid(), "ns-uid");
        assert_eq!(view.data()["spec"]["replicas"], 2);
    }

    #[test]
    fn test_identity_requires_name() {
        let rt = deployment_type();
        let unnamed = dynamic(None, Some("default"), "1");
        assert!(ObjectView::new(&rt, &unnamed, "").identity().is_none());

        let named = dynamic(Some("web"), Some("default"), "1");
        let identity = ObjectView::new(&rt, &named, "").identity().unwrap();
        assert_eq!(identity, ValidationIdentity::new(&rt, "default", "web"));
        assert_eq!(identity.to_string(), "apps/v1/Deployment default/web");
    }

    #[test]
    fn test_cluster_scoped_identity_display() {
        let rt = ResourceType::new(
            "rbac.authorization.k8s.io",
            "v1",
            "ClusterRole",
            "clusterroles",
            false,
        );
        let identity = ValidationIdentity::new(&rt, "", "admin");
        assert_eq!(
            identity.to_string(),
            "rbac.authorization.k8s.io/v1/ClusterRole admin"
        );
    }
}
