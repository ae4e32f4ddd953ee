use std::f64::consts::PI;
use std::sync::Arc;

use axum::{http::StatusCode, routing::get};
use chrono::{DateTime, Duration, Utc};
use grafana_json_server::{
    handler_fn, logging, serve, BoxError, Column, DataPoint, Metric, MetricPayload, PayloadKind,
    PayloadOption, PayloadOptionsRequest, QueryContext, QueryRequest, QueryResponse, ScopedVar,
    Server, ServerConfig, TableResponse, TimeSeriesResponse, Variable, VariableRequest,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "server failed");
        eprintln!("grafana-json-server-demo: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::from_env()?;
    logging::init_logger(config.log_format)?;

    let foo = Metric::new("foo")
        .with_label("Metric 1")
        .with_payload(
            MetricPayload::new("option1", PayloadKind::Select)
                .with_label("Option 1")
                .with_width(40)
                .with_options(vec![
                    PayloadOption::new("Value 1", "value 1"),
                    PayloadOption::new("Value 2", "value 2"),
                ]),
        )
        .with_payload(
            MetricPayload::new("option2", PayloadKind::MultiSelect)
                .with_label("Option 2")
                .with_width(40),
        );
    let bar = Metric::new("bar").with_label("Metric 2");

    let mut builder = Server::builder()
        .metric_with_options(foo, handler_fn(time_series_query), payload_options)
        .metric(bar, handler_fn(table_query))
        .variable("query0", |_: &VariableRequest| -> Result<Vec<Variable>, BoxError> {
            Ok(["1", "5", "10"]
                .into_iter()
                .map(|v| Variable::new(v, v))
                .collect())
        })
        .request_log_level(config.request_log_level);

    if let Some(metrics) = &config.metrics {
        builder =
            builder.prometheus_metrics(&metrics.namespace, &metrics.subsystem, &metrics.application)?;
    }
    let server = builder.build();

    let exposition = match server.prometheus_metrics() {
        Some(metrics) => {
            let registry = Registry::new();
            metrics.register(&registry)?;
            Some(registry)
        }
        None => None,
    };
    let mut router = server.into_router();
    if let Some(registry) = exposition {
        router = router.route("/prometheus", get(move || render_prometheus(registry.clone())));
    }

    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "starting demo server");
    serve(listener, router, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutting down");
    })
    .await?;
    Ok(())
}

async fn render_prometheus(registry: Registry) -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| {
            error!(error = %e, "failed to encode prometheus metrics");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn payload_options(request: &PayloadOptionsRequest) -> Result<Vec<PayloadOption>, BoxError> {
    #[derive(Deserialize)]
    struct Selected {
        #[serde(default)]
        option1: String,
        #[serde(default)]
        option2: Vec<String>,
    }

    let selected: Selected = request.get_payload()?;
    info!(
        metric = %request.metric,
        payload = %request.name,
        option1 = %selected.option1,
        option2 = ?selected.option2,
        "payload options requested"
    );
    Ok(vec![
        PayloadOption::new("one", "one"),
        PayloadOption::new("two", "two"),
    ])
}

/// Reads the `query0` dashboard variable as the number of waves per panel.
fn scale(request: &QueryRequest) -> Result<f64, BoxError> {
    #[derive(Deserialize)]
    struct Vars {
        query0: ScopedVar<String>,
    }

    let vars: Vars = request.get_scoped_vars()?;
    Ok(vars.query0.value.parse::<u32>()? as f64)
}

/// Timestamps from the start of the range up to its end, one interval apart.
fn timestamps(request: &QueryRequest) -> Vec<DateTime<Utc>> {
    let (Some(from), Some(to)) = (request.range.from, request.range.to) else {
        return Vec::new();
    };
    let step = Duration::milliseconds(request.interval_ms.max(1) as i64);

    let mut out = Vec::new();
    let mut ts = from;
    while ts < to {
        out.push(ts);
        ts += step;
    }
    out
}

fn wave(request: &QueryRequest, f: fn(f64) -> f64) -> Vec<(DateTime<Utc>, f64)> {
    let period = request.max_data_points as f64 / scale(request).unwrap_or(1.0);
    timestamps(request)
        .into_iter()
        .enumerate()
        .map(|(i, ts)| (ts, 100.0 * f(i as f64 * 2.0 * PI / period)))
        .collect()
}

async fn time_series_query(
    _ctx: QueryContext,
    target: String,
    request: Arc<QueryRequest>,
) -> Result<QueryResponse, BoxError> {
    let datapoints = wave(&request, f64::cos)
        .into_iter()
        .map(|(ts, value)| DataPoint::new(ts, value))
        .collect();
    Ok(TimeSeriesResponse::new(target)
        .with_datapoints(datapoints)
        .into())
}

async fn table_query(
    _ctx: QueryContext,
    _target: String,
    request: Arc<QueryRequest>,
) -> Result<QueryResponse, BoxError> {
    let (times, values): (Vec<_>, Vec<_>) = wave(&request, f64::sin).into_iter().unzip();
    Ok(TableResponse::new(vec![
        Column::time("time", times),
        Column::number("bar", values),
    ])
    .into())
}
