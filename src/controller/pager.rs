//! Paginated object listing
//!
//! Objects are pulled one page at a time through the server's continuation
//! token. The caller drives the stream, so at most one page of one resource
//! type is resident at any point.

use futures::stream::{self, Stream};
use kube::core::DynamicObject;

use super::client::ClusterClient;
use super::object::ResourceType;
use crate::{Error, Result};

/// Lazily lists every object of `resource` in `namespace` (or cluster-wide
/// when `None`), yielding one page per item.
///
/// The stream ends once the server returns no continuation token. A failed
/// request yields `Error::ListError` and nothing further; pages yielded
/// before it stay valid.
pub fn list_pages<'a>(
    client: &'a dyn ClusterClient,
    resource: &'a ResourceType,
    namespace: Option<&'a str>,
    page_size: u32,
) -> impl Stream<Item = Result<Vec<DynamicObject>>> + Send + 'a {
    // State: Some(token) while another request is due, None once exhausted.
    stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(token) = state else {
            return Ok(None);
        };

        let page = client
            .list_page(resource, namespace, page_size, token)
            .await
            .map_err(|source| Error::ListError {
                resource: resource.to_string(),
                namespace: namespace.map(str::to_string),
                source,
            })?;

        let next = page.continue_token.filter(|t| !t.is_empty()).map(Some);
        Ok(Some((page.items, next)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::client::ObjectPage;
    use crate::controller::object::Namespace;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `total` pods, using the next offset as continuation token.
    struct PagedPods {
        total: usize,
        fail_on_call: Option<usize>,
        calls: AtomicUsize,
    }

    impl PagedPods {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_on_call: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ClusterClient for PagedPods {
        async fn discover_resources(&self) -> kube::Result<Vec<ResourceType>> {
            Ok(vec![])
        }

        async fn list_namespaces(&self) -> kube::Result<Vec<Namespace>> {
            Ok(vec![])
        }

        async fn list_page(
            &self,
            resource: &ResourceType,
            _namespace: Option<&str>,
            limit: u32,
            continue_token: Option<String>,
        ) -> kube::Result<ObjectPage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(call) {
                return Err(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "etcd timeout".to_string(),
                    reason: "Timeout".to_string(),
                    code: 504,
                }));
            }

            let start: usize = continue_token
                .as_deref()
                .map(|t| t.parse().unwrap())
                .unwrap_or(0);
            let end = (start + limit as usize).min(self.total);
            let ar = resource.api_resource();
            let items = (start..end)
                .map(|i| DynamicObject::new(&format!("pod-{}", i), &ar))
                .collect();
            let continue_token = if end < self.total {
                Some(end.to_string())
            } else {
                Some(String::new())
            };
            Ok(ObjectPage {
                items,
                continue_token,
            })
        }
    }

    fn pods() -> ResourceType {
        ResourceType::new("", "v1", "Pod", "pods", true)
    }

    #[tokio::test]
    async fn test_pages_cover_every_object_once() {
        let client = PagedPods::new(12);
        let rt = pods();
        let pages: Vec<Vec<DynamicObject>> = list_pages(&client, &rt, Some("default"), 5)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![5, 5, 2]);

        let names: Vec<String> = pages
            .into_iter()
            .flatten()
            .filter_map(|o| o.metadata.name)
            .collect();
        let expected: Vec<String> = (0..12).map(|i| format!("pod-{}", i)).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_page_size() {
        let client = PagedPods::new(10);
        let rt = pods();
        let pages: Vec<Vec<DynamicObject>> = list_pages(&client, &rt, None, 5)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(pages.into_iter().flatten().count(), 10);
    }

    #[tokio::test]
    async fn test_is_lazy() {
        let client = PagedPods::new(12);
        let rt = pods();
        let stream = list_pages(&client, &rt, None, 5);
        futures::pin_mut!(stream);

        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mid_pagination_failure() {
        let client = PagedPods {
            fail_on_call: Some(2),
            ..PagedPods::new(12)
        };
        let rt = pods();
        let stream = list_pages(&client, &rt, Some("default"), 5);
        futures::pin_mut!(stream);

        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.len(), 5);

        let err = stream.try_next().await.unwrap_err();
        match err {
            Error::ListError {
                resource,
                namespace,
                ..
            } => {
                assert_eq!(resource, "v1/Pod");
                assert_eq!(namespace.as_deref(), Some("default"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
