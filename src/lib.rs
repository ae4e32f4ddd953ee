//! Server side of the Grafana JSON API datasource protocol.
//!
//! Register query handlers, payload option resolvers and variable resolvers on a
//! [`ServerBuilder`], turn the resulting [`Server`] into an axum router and serve
//! it. The router answers the datasource's HTTP calls; `/query` requests are
//! fanned out to the handlers by the [`Dispatcher`] and their results encoded
//! in the wire format Grafana expects.

pub mod api;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metric;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod response;
pub mod variable;

pub use api::{serve, Server, ServerBuilder};
pub use config::{ConfigError, ServerConfig};
pub use dispatcher::{Dispatcher, QueryContext};
pub use error::{BoxError, DispatchError, Error, Result};
pub use metric::{
    Metric, MetricPayload, PayloadKind, PayloadOption, PayloadOptionsRequest,
    PayloadOptionsResolver,
};
pub use metrics::{Instrumentation, NoopInstrumentation, PrometheusMetrics};
pub use registry::{handler_fn, DataSource, HandlerFn, HandlerRegistry, QueryHandler};
pub use request::{PayloadError, QueryRequest, QueryTarget, Range, ScopedVar};
pub use response::{
    Column, ColumnData, DataPoint, QueryResponse, TableResponse, TableShapeError,
    TimeSeriesResponse,
};
pub use variable::{Variable, VariableRegistry, VariableRequest, VariableResolver};
