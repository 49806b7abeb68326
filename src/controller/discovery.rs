//! Resource type discovery filtered to what the validation engine evaluates

use std::collections::BTreeSet;

use tracing::debug;

use super::client::ClusterClient;
use super::object::ResourceType;
use crate::validation::ValidationEngine;
use crate::{Error, Result};

/// Stateless: every call goes back to the cluster, since CRDs and their
/// kinds can appear or disappear between cycles.
pub struct ResourceTypeDiscoverer;

impl ResourceTypeDiscoverer {
    /// Resource types the engine supports, sorted and without duplicates.
    ///
    /// An empty result is valid; only a failing discovery call is an error.
    pub async fn discover(
        client: &dyn ClusterClient,
        engine: &dyn ValidationEngine,
    ) -> Result<Vec<ResourceType>> {
        let served = client
            .discover_resources()
            .await
            .map_err(Error::DiscoveryError)?;
        let served_count = served.len();

        let mut seen = BTreeSet::new();
        let mut supported: Vec<ResourceType> = served
            .into_iter()
            .filter(|rt| !rt.plural.contains('/'))
            .filter(|rt| engine.supports(&rt.group, &rt.kind))
            .filter(|rt| seen.insert((rt.group.clone(), rt.kind.clone())))
            .collect();
        supported.sort();

        debug!(
            "{} of {} served resource types are supported by the engine",
            supported.len(),
            served_count
        );
        Ok(supported)
    }
}
