use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, MethodRouter},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use super::handlers::{self, AppState};
use crate::{
    dispatcher::Dispatcher,
    metric::{Metric, PayloadOptionsResolver},
    metrics::{Instrumentation, PrometheusMetrics},
    registry::{DataSource, HandlerRegistry, QueryHandler},
    variable::{VariableRegistry, VariableResolver},
};

/// Configures a [`Server`].
///
/// ```no_run
/// use grafana_json_server::{handler_fn, BoxError, Metric, QueryResponse, ServerBuilder, TimeSeriesResponse};
///
/// let server = ServerBuilder::new()
///     .metric(
///         Metric::new("metric1").with_label("My first metric"),
///         handler_fn(|_ctx, target, _request| async move {
///             Ok::<_, BoxError>(QueryResponse::from(TimeSeriesResponse::new(target)))
///         }),
///     )
///     .build();
/// let router = server.into_router();
/// ```
pub struct ServerBuilder {
    registry: HandlerRegistry,
    variables: VariableRegistry,
    instrumentation: Option<Arc<dyn Instrumentation>>,
    prometheus: Option<PrometheusMetrics>,
    request_log_level: Level,
    extra_routes: Router,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            variables: VariableRegistry::new(),
            instrumentation: None,
            prometheus: None,
            request_log_level: Level::DEBUG,
            extra_routes: Router::new(),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a metric answered by `handler`, without dynamic payload options.
    pub fn metric(self, metric: Metric, handler: impl QueryHandler) -> Self {
        self.data_source(DataSource {
            metric,
            handler: Some(Arc::new(handler)),
            payload_options: None,
        })
    }

    /// Registers a metric whose `select` payloads without static options are
    /// resolved by `options`.
    pub fn metric_with_options(
        self,
        metric: Metric,
        handler: impl QueryHandler,
        options: impl PayloadOptionsResolver,
    ) -> Self {
        self.data_source(DataSource {
            metric,
            handler: Some(Arc::new(handler)),
            payload_options: Some(Arc::new(options)),
        })
    }

    /// Registers a bare metric named `name`.
    pub fn handler(self, name: impl Into<String>, handler: impl QueryHandler) -> Self {
        self.metric(Metric::new(name), handler)
    }

    pub fn data_source(mut self, source: DataSource) -> Self {
        self.registry.register(source);
        self
    }

    pub fn variable(mut self, name: impl Into<String>, resolver: impl VariableResolver) -> Self {
        self.variables.register(name, resolver);
        self
    }

    pub fn instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    /// Records query durations and errors as Prometheus metrics. Register them with
    /// [`Server::prometheus_metrics`] and [`PrometheusMetrics::register`].
    pub fn prometheus_metrics(
        mut self,
        namespace: &str,
        subsystem: &str,
        application: &str,
    ) -> Result<Self, prometheus::Error> {
        let metrics = PrometheusMetrics::new(namespace, subsystem, application)?;
        self.instrumentation = Some(Arc::new(metrics.clone()));
        self.prometheus = Some(metrics);
        Ok(self)
    }

    /// Level of the per-request log events.
    pub fn request_log_level(mut self, level: Level) -> Self {
        self.request_log_level = level;
        self
    }

    /// Adds an application route next to the protocol endpoints.
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.extra_routes = self.extra_routes.route(path, method_router);
        self
    }

    pub fn build(self) -> Server {
        let registry = Arc::new(self.registry);
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry));
        if let Some(instrumentation) = self.instrumentation {
            dispatcher = dispatcher.with_instrumentation(instrumentation);
        }

        Server {
            state: AppState {
                dispatcher,
                registry,
                variables: Arc::new(self.variables),
            },
            prometheus: self.prometheus,
            request_log_level: self.request_log_level,
            extra_routes: self.extra_routes,
        }
    }
}

/// A configured JSON API server. Turn it into an axum [`Router`] with
/// [`Server::into_router`].
pub struct Server {
    state: AppState,
    prometheus: Option<PrometheusMetrics>,
    request_log_level: Level,
    extra_routes: Router,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }

    pub fn prometheus_metrics(&self) -> Option<&PrometheusMetrics> {
        self.prometheus.as_ref()
    }

    pub fn into_router(self) -> Router {
        let trace = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(self.request_log_level))
            .on_response(DefaultOnResponse::new().level(self.request_log_level));

        Router::new()
            .route("/metrics", post(handlers::metrics))
            .route("/metric-payload-options", post(handlers::metric_payload_options))
            .route("/variable", post(handlers::variable))
            .route("/tag-keys", post(handlers::not_implemented))
            .route("/tag-values", post(handlers::not_implemented))
            .route("/query", post(handlers::query))
            .layer(trace)
            // liveness probe stays out of the request log
            .route("/", get(handlers::heartbeat))
            .with_state(self.state)
            .merge(self.extra_routes)
    }
}

/// Serves `router` on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "serving Grafana JSON API");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
