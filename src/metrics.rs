use std::time::{Duration, Instant};

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Records how query targets perform. Implementations must tolerate concurrent
/// calls from any number of in-flight requests.
pub trait Instrumentation: Send + Sync + 'static {
    /// A registered handler ran for `elapsed`; `failed` is set when it returned an error.
    fn observe(&self, target: &str, elapsed: Duration, failed: bool);

    /// A query named a target that is not registered.
    fn unknown_target(&self, target: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn observe(&self, _target: &str, _elapsed: Duration, _failed: bool) {}

    fn unknown_target(&self, _target: &str) {}
}

/// Prometheus query metrics:
///
/// - `<namespace>_<subsystem>_json_query_duration_seconds{target}`
/// - `<namespace>_<subsystem>_json_query_error_count{target}`
///
/// Both carry a constant `application` label. Call [`PrometheusMetrics::register`]
/// to expose them through a registry.
#[derive(Clone)]
pub struct PrometheusMetrics {
    duration: HistogramVec,
    errors: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new(
        namespace: &str,
        subsystem: &str,
        application: &str,
    ) -> Result<Self, prometheus::Error> {
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "json_query_duration_seconds",
                "Grafana JSON Data server duration of query requests in seconds",
            )
            .namespace(namespace)
            .subsystem(subsystem)
            .const_label("application", application),
            &["target"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "json_query_error_count",
                "Grafana JSON Data server count of failed requests",
            )
            .namespace(namespace)
            .subsystem(subsystem)
            .const_label("application", application),
            &["target"],
        )?;

        Ok(Self { duration, errors })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        Ok(())
    }

    pub fn error_count(&self, target: &str) -> u64 {
        self.errors.with_label_values(&[target]).get()
    }

    pub fn query_count(&self, target: &str) -> u64 {
        self.duration.with_label_values(&[target]).get_sample_count()
    }
}

impl Instrumentation for PrometheusMetrics {
    fn observe(&self, target: &str, elapsed: Duration, failed: bool) {
        self.duration
            .with_label_values(&[target])
            .observe(elapsed.as_secs_f64());
        if failed {
            self.errors.with_label_values(&[target]).inc();
        }
    }

    fn unknown_target(&self, target: &str) {
        self.errors.with_label_values(&[target]).inc();
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

/// Times one handler invocation.
pub struct QueryTimer<'a> {
    instrumentation: &'a dyn Instrumentation,
    target: &'a str,
    start: Instant,
}

impl<'a> QueryTimer<'a> {
    pub fn start(instrumentation: &'a dyn Instrumentation, target: &'a str) -> Self {
        Self {
            instrumentation,
            target,
            start: Instant::now(),
        }
    }

    pub fn finish(self, failed: bool) {
        self.instrumentation
            .observe(self.target, self.start.elapsed(), failed);
    }
}
