//! Namespace resolution with exclusion filtering
//!
//! The filtered namespace list is fetched once per reconciliation cycle and
//! shared by every resource kind scanned in that cycle.

use regex::Regex;
use tracing::debug;

use super::client::ClusterClient;
use super::object::Namespace;
use crate::{Error, Result};

pub struct NamespaceResolver {
    ignore: Option<Regex>,
    cached: Option<Vec<Namespace>>,
}

impl NamespaceResolver {
    /// Compiles the exclusion pattern. An empty pattern means no exclusion.
    pub fn new(ignore_pattern: Option<&str>) -> Result<Self> {
        let ignore = match ignore_pattern.filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(Self {
            ignore,
            cached: None,
        })
    }

    /// Returns the filtered namespaces, listing them from the cluster only on
    /// the first call after construction or [`reset`](Self::reset).
    pub async fn resolve(&mut self, client: &dyn ClusterClient) -> Result<&[Namespace]> {
        if self.cached.is_none() {
            let all = client
                .list_namespaces()
                .await
                .map_err(Error::NamespaceListError)?;
            let total = all.len();

            let kept: Vec<Namespace> = all
                .into_iter()
                .filter(|ns| !self.is_ignored(&ns.name))
                .collect();
            debug!(
                "Resolved {} namespaces ({} excluded by pattern)",
                kept.len(),
                total - kept.len()
            );
            self.cached = Some(kept);
        }

        Ok(self.cached.as_deref().unwrap_or_default())
    }

    /// Drops the snapshot so the next `resolve` re-queries the cluster.
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// UID of a namespace from the current snapshot.
    pub fn namespace_uid(&self, name: &str) -> Option<&str> {
        self.cached
            .as_ref()?
            .iter()
            .find(|ns| ns.name == name)
            .map(|ns| ns.uid.as_str())
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore
            .as_ref()
            .map(|re| re.is_match(name))
            .unwrap_or(false)
    }
}
