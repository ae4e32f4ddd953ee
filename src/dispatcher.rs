//! Routing of `/query` requests to registered handlers.
//!
//! Every target of a request is resolved against the [`HandlerRegistry`] and the
//! matching handlers run concurrently. Unknown targets and failing handlers are
//! logged, counted and left out of the result; they never fail the request.
//! Results keep the order of the request's targets.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::codec::{self, EncodeError};
use crate::error::DispatchError;
use crate::metrics::{Instrumentation, NoopInstrumentation, QueryTimer};
use crate::registry::HandlerRegistry;
use crate::request::QueryRequest;
use crate::response::QueryResponse;

/// Per-invocation context handed to a [`QueryHandler`](crate::QueryHandler).
#[derive(Debug, Clone)]
pub struct QueryContext {
    ref_id: String,
    cancellation: CancellationToken,
}

impl QueryContext {
    /// A context that is never cancelled, for calling handlers directly.
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self::with_cancellation(ref_id, CancellationToken::new())
    }

    pub fn with_cancellation(ref_id: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            ref_id: ref_id.into(),
            cancellation,
        }
    }

    /// Correlation id of the target being served. Pass it to
    /// [`QueryRequest::get_payload`] or [`QueryRequest::correlated_payloads`].
    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    /// Cancelled when the caller goes away. Handlers that spawn work should stop it then.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    instrumentation: Arc<dyn Instrumentation>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            instrumentation: Arc::new(NoopInstrumentation),
        }
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Runs every target of `request` and collects the successful results, in
    /// request order. `cancellation` is handed to each handler.
    #[instrument(
        name = "dispatch_query",
        skip_all,
        fields(targets = request.targets.len())
    )]
    pub async fn dispatch(
        &self,
        request: Arc<QueryRequest>,
        cancellation: CancellationToken,
    ) -> Vec<QueryResponse> {
        let runs = request.targets.iter().map(|target| {
            let ctx = QueryContext::with_cancellation(&target.ref_id, cancellation.clone());
            self.query_target(ctx, &target.target, Arc::clone(&request))
        });

        join_all(runs)
            .await
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(response) => Some(response),
                Err(DispatchError::UnknownTarget(target)) => {
                    warn!(query_target = %target, "invalid query target");
                    None
                }
                Err(err @ DispatchError::Handler { .. }) => {
                    error!(error = %err, "query failed");
                    None
                }
            })
            .collect()
    }

    /// Dispatches `request` and encodes the aggregate response body.
    ///
    /// Fails only when a result cannot be encoded (a table with ragged columns),
    /// in which case nothing is returned for any target.
    pub async fn dispatch_and_encode(
        &self,
        request: Arc<QueryRequest>,
        cancellation: CancellationToken,
    ) -> Result<Vec<u8>, EncodeError> {
        let responses = self.dispatch(request, cancellation).await;
        codec::encode_responses(&responses)
    }

    async fn query_target(
        &self,
        ctx: QueryContext,
        target: &str,
        request: Arc<QueryRequest>,
    ) -> Result<QueryResponse, DispatchError> {
        let Some(handler) = self.registry.handler(target) else {
            self.instrumentation.unknown_target(target);
            return Err(DispatchError::UnknownTarget(target.to_string()));
        };

        debug!(query_target = %target, ref_id = %ctx.ref_id(), "running query");
        let timer = QueryTimer::start(self.instrumentation.as_ref(), target);
        let result = handler.query(ctx, target.to_string(), request).await;
        timer.finish(result.is_err());

        result.map_err(|source| DispatchError::Handler {
            target: target.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::error::BoxError;
    use crate::metric::Metric;
    use crate::registry::{handler_fn, DataSource, QueryHandler};
    use crate::response::{Column, DataPoint, TableResponse, TimeSeriesResponse};

    #[derive(Default)]
    struct Recorder {
        observed: Mutex<Vec<(String, bool)>>,
        unknown: Mutex<Vec<String>>,
    }

    impl Instrumentation for Recorder {
        fn observe(&self, target: &str, _elapsed: Duration, failed: bool) {
            self.observed.lock().unwrap().push((target.to_string(), failed));
        }

        fn unknown_target(&self, target: &str) {
            self.unknown.lock().unwrap().push(target.to_string());
        }
    }

    fn register(registry: &mut HandlerRegistry, name: &str, handler: impl QueryHandler) {
        registry.register(DataSource {
            metric: Metric::new(name),
            handler: Some(Arc::new(handler)),
            payload_options: None,
        });
    }

    fn series(target: &str, value: f64) -> QueryResponse {
        TimeSeriesResponse::new(target)
            .with_datapoints(vec![DataPoint::new(
                Utc.with_ymd_and_hms(2023, 7, 15, 0, 0, 0).unwrap(),
                value,
            )])
            .into()
    }

    fn request(json: &str) -> Arc<QueryRequest> {
        Arc::new(serde_json::from_str(json).unwrap())
    }

    fn dispatcher() -> (Dispatcher, Arc<Recorder>) {
        let mut registry = HandlerRegistry::new();
        register(
            &mut registry,
            "foo",
            handler_fn(|_ctx, target, _req| async move {
                Ok::<_, BoxError>(series(&target, 10.0))
            }),
        );
        register(
            &mut registry,
            "slow",
            handler_fn(|_ctx, target, _req| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, BoxError>(series(&target, 1.0))
            }),
        );
        register(
            &mut registry,
            "fubar",
            handler_fn(|_ctx, _target, _req| async move {
                Err::<QueryResponse, BoxError>("fubar".into())
            }),
        );
        register(
            &mut registry,
            "ragged",
            handler_fn(|_ctx, _target, _req| async move {
                Ok::<_, BoxError>(QueryResponse::from(TableResponse::new(vec![
                    Column::time("time", vec![Utc::now()]),
                    Column::number("value", vec![1.0, 2.0, 3.0]),
                ])))
            }),
        );
        register(
            &mut registry,
            "multi",
            handler_fn(|ctx, target, req| async move {
                #[derive(serde::Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Payload {
                    target_seq: String,
                }
                let payload: Payload = req
                    .get_payload(&target, ctx.ref_id())?
                    .ok_or("no payload found")?;
                let value = match payload.target_seq.as_str() {
                    "first" => 1.0,
                    "second" => 2.0,
                    _ => 0.0,
                };
                Ok::<_, BoxError>(series(&target, value))
            }),
        );

        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::new(registry))
            .with_instrumentation(recorder.clone() as Arc<dyn Instrumentation>);
        (dispatcher, recorder)
    }

    #[tokio::test]
    async fn test_drop_on_unknown_target() {
        let (dispatcher, recorder) = dispatcher();
        let responses = dispatcher
            .dispatch(
                request(r#"{ "targets": [ { "target": "foo" }, { "target": "missing" } ] }"#),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(responses, vec![series("foo", 10.0)]);
        assert_eq!(*recorder.unknown.lock().unwrap(), vec!["missing".to_string()]);
        assert_eq!(
            *recorder.observed.lock().unwrap(),
            vec![("foo".to_string(), false)]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_drop_on_handler_error() {
        let (dispatcher, recorder) = dispatcher();
        let responses = dispatcher
            .dispatch(
                request(r#"{ "targets": [ { "target": "fubar" }, { "target": "foo" } ] }"#),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(responses, vec![series("foo", 10.0)]);
        let failures: Vec<_> = recorder
            .observed
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, failed)| *failed)
            .map(|(target, _)| target.clone())
            .collect();
        assert_eq!(failures, vec!["fubar".to_string()]);
        assert!(recorder.unknown.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let (dispatcher, _) = dispatcher();
        let responses = dispatcher
            .dispatch(
                request(r#"{ "targets": [ { "target": "slow" }, { "target": "foo" } ] }"#),
                CancellationToken::new(),
            )
            .await;

        // slow finishes last but stays first
        assert_eq!(responses, vec![series("slow", 1.0), series("foo", 10.0)]);
    }

    #[tokio::test]
    async fn test_payload_per_correlation_id() {
        let (dispatcher, _) = dispatcher();
        let responses = dispatcher
            .dispatch(
                request(
                    r#"{ "targets": [
                        { "target": "multi", "refId": "A", "payload": { "targetSeq": "first" } },
                        { "target": "multi", "refId": "B", "payload": { "targetSeq": "second" } }
                    ] }"#,
                ),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(responses, vec![series("multi", 1.0), series("multi", 2.0)]);
    }

    #[tokio::test]
    async fn test_empty_request() {
        let (dispatcher, _) = dispatcher();
        let body = dispatcher
            .dispatch_and_encode(request("{}"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_ragged_table_fails_whole_response() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher
            .dispatch_and_encode(
                request(r#"{ "targets": [ { "target": "foo" }, { "target": "ragged" } ] }"#),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(EncodeError::TableShape(_))));
    }

    #[tokio::test]
    async fn test_handlers_see_cancellation() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = started.clone();
        register(
            &mut registry,
            "wait",
            handler_fn(move |ctx, _target, _req| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctx.cancelled().await;
                    Err::<QueryResponse, BoxError>("cancelled".into())
                }
            }),
        );
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let token = CancellationToken::new();
        let run = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let token = token.clone();
            async move {
                dispatcher
                    .dispatch(request(r#"{ "targets": [ { "target": "wait" } ] }"#), token)
                    .await
            }
        });

        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();

        let responses = run.await.unwrap();
        assert!(responses.is_empty());
    }
}
