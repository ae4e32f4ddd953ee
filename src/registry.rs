use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatcher::QueryContext;
use crate::error::BoxError;
use crate::metric::{Metric, PayloadOptionsResolver};
use crate::request::QueryRequest;
use crate::response::QueryResponse;

/// Answers queries for one target.
///
/// `target` is the name the handler was registered under. The full request is
/// passed along so the handler can read sibling payloads and dashboard variables.
#[async_trait]
pub trait QueryHandler: Send + Sync + 'static {
    async fn query(
        &self,
        ctx: QueryContext,
        target: String,
        request: Arc<QueryRequest>,
    ) -> Result<QueryResponse, BoxError>;
}

/// Adapts an async function or closure into a [`QueryHandler`].
#[derive(Clone)]
pub struct HandlerFn<F>(F);

/// Wraps `f` as a [`QueryHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(QueryContext, String, Arc<QueryRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<QueryResponse, BoxError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> QueryHandler for HandlerFn<F>
where
    F: Fn(QueryContext, String, Arc<QueryRequest>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<QueryResponse, BoxError>> + Send + 'static,
{
    async fn query(
        &self,
        ctx: QueryContext,
        target: String,
        request: Arc<QueryRequest>,
    ) -> Result<QueryResponse, BoxError> {
        (self.0)(ctx, target, request).await
    }
}

/// One registered data source: its metadata, its query handler and, optionally,
/// a resolver for dynamic payload options.
#[derive(Clone)]
pub struct DataSource {
    pub metric: Metric,
    pub handler: Option<Arc<dyn QueryHandler>>,
    pub payload_options: Option<Arc<dyn PayloadOptionsResolver>>,
}

/// Data sources by target name, kept in registration order so `/metrics` lists
/// them deterministically. Built once at startup; read-only while serving.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    sources: Vec<DataSource>,
    index: HashMap<String, usize>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a data source under its metric's `value`. A later registration
    /// with the same name replaces the earlier one in place.
    pub fn register(&mut self, source: DataSource) {
        let name = source.metric.value.clone();
        match self.index.get(&name) {
            Some(&slot) => self.sources[slot] = source,
            None => {
                self.index.insert(name, self.sources.len());
                self.sources.push(source);
            }
        }
    }

    pub fn get(&self, target: &str) -> Option<&DataSource> {
        self.index.get(target).map(|&slot| &self.sources[slot])
    }

    /// The query handler for `target`, if the target is registered with one.
    pub fn handler(&self, target: &str) -> Option<&Arc<dyn QueryHandler>> {
        self.get(target).and_then(|source| source.handler.as_ref())
    }

    /// Metric metadata. A blank `filter` returns every metric.
    pub fn metrics(&self, filter: &str) -> Vec<&Metric> {
        self.sources
            .iter()
            .map(|source| &source.metric)
            .filter(|metric| filter.is_empty() || metric.value == filter)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field(
                "targets",
                &self
                    .sources
                    .iter()
                    .map(|source| source.metric.value.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::TimeSeriesResponse;

    fn source(name: &str) -> DataSource {
        DataSource {
            metric: Metric::new(name),
            handler: Some(Arc::new(handler_fn(|_ctx, target, _request| async move {
                Ok::<_, BoxError>(QueryResponse::from(TimeSeriesResponse::new(target)))
            }))),
            payload_options: None,
        }
    }

    #[test]
    fn test_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(source("b"));
        registry.register(source("a"));
        registry.register(source("c"));

        let names: Vec<&str> = registry.metrics("").iter().map(|m| m.value.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(registry.metrics("a").len(), 1);
        assert!(registry.metrics("missing").is_empty());
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(source("a"));
        registry.register(DataSource {
            metric: Metric::new("a").with_label("A"),
            handler: None,
            payload_options: None,
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().metric.label, "A");
        assert!(registry.handler("a").is_none());
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let registry = {
            let mut registry = HandlerRegistry::new();
            registry.register(source("foo"));
            registry
        };

        let handler = registry.handler("foo").unwrap();
        let response = handler
            .query(
                QueryContext::new("A"),
                "foo".to_string(),
                Arc::new(QueryRequest::default()),
            )
            .await
            .unwrap();
        assert_eq!(response, TimeSeriesResponse::new("foo").into());
    }
}
