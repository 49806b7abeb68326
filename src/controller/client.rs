//! Kubernetes API access used by the reconciliation core
//!
//! The scheduler only needs three calls from the cluster: discovery,
//! namespace listing and paginated object listing. They sit behind
//! [`ClusterClient`] so scheduler scenarios can run against an in-memory
//! cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace as K8sNamespace;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::discovery::{verbs, Discovery, Scope};
use kube::Client;
use tracing::debug;

use super::object::{Namespace, ResourceType};

/// One page of a list response.
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    pub items: Vec<DynamicObject>,
    /// Continuation token for the next page; `None` or empty on the last page
    pub continue_token: Option<String>,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// All listable resource types at the server-preferred versions.
    async fn discover_resources(&self) -> kube::Result<Vec<ResourceType>>;

    /// Every namespace in the cluster, unfiltered.
    async fn list_namespaces(&self) -> kube::Result<Vec<Namespace>>;

    /// A single page of objects. `namespace` is `None` for a cluster-wide list.
    async fn list_page(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        limit: u32,
        continue_token: Option<String>,
    ) -> kube::Result<ObjectPage>;
}

/// [`ClusterClient`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn discover_resources(&self) -> kube::Result<Vec<ResourceType>> {
        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut resources = Vec::new();
        for group in discovery.groups() {
            // recommended_resources() only yields top-level resources at the
            // preferred version; subresources live under caps.subresources.
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                resources.push(ResourceType {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    plural: ar.plural.clone(),
                    namespaced: caps.scope == Scope::Namespaced,
                });
            }
        }

        debug!("Discovered {} listable resource types", resources.len());
        Ok(resources)
    }

    async fn list_namespaces(&self) -> kube::Result<Vec<Namespace>> {
        let api: Api<K8sNamespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| {
                let name = ns.metadata.name?;
                let uid = ns.metadata.uid.unwrap_or_default();
                Some(Namespace { name, uid })
            })
            .collect())
    }

    async fn list_page(
        &self,
        resource: &ResourceType,
        namespace: Option<&str>,
        limit: u32,
        continue_token: Option<String>,
    ) -> kube::Result<ObjectPage> {
        let ar = resource.api_resource();
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };

        let mut params = ListParams::default().limit(limit);
        if let Some(token) = continue_token.as_deref() {
            params = params.continue_token(token);
        }

        let list = api.list(&params).await?;
        Ok(ObjectPage {
            items: list.items,
            continue_token: list.metadata.continue_,
        })
    }
}
