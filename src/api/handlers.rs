use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    dispatcher::Dispatcher,
    metric::{Metric, MetricRequest, PayloadOption, PayloadOptionsRequest},
    registry::HandlerRegistry,
    request::QueryRequest,
    variable::{Variable, VariableRegistry, VariableRequest},
    Error, Result,
};

#[derive(Clone, Debug)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub registry: Arc<HandlerRegistry>,
    pub variables: Arc<VariableRegistry>,
}

/// Bodies are decoded by hand so every malformed body maps to 400.
fn decode<T: serde::de::DeserializeOwned>(endpoint: &str, body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        error!(endpoint, error = %e, "invalid request");
        Error::InvalidRequest(e)
    })
}

/// GET /
pub async fn heartbeat() -> &'static str {
    "."
}

/// POST /metrics
pub async fn metrics(State(state): State<AppState>, body: Bytes) -> Result<Json<Vec<Metric>>> {
    let request: MetricRequest = decode("metrics", &body)?;

    Ok(Json(
        state
            .registry
            .metrics(&request.metric)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

/// POST /metric-payload-options
pub async fn metric_payload_options(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<PayloadOption>>> {
    let request: PayloadOptionsRequest = decode("metric-payload-options", &body)?;

    let Some(source) = state.registry.get(&request.metric) else {
        return Ok(Json(Vec::new()));
    };
    let Some(resolver) = source.payload_options.as_ref() else {
        error!(metric = %request.metric, "metric has no payload option function");
        return Err(Error::MissingPayloadOptions(request.metric));
    };

    let options = resolver.resolve(&request).map_err(|e| {
        error!(metric = %request.metric, payload = %request.name, error = %e, "metric payload options failed");
        Error::PayloadOptionsFailed(e)
    })?;
    Ok(Json(options))
}

/// POST /variable
pub async fn variable(State(state): State<AppState>, body: Bytes) -> Result<Json<Vec<Variable>>> {
    let request: VariableRequest = decode("variable", &body)?;

    let Some(resolver) = state.variables.get(&request.target) else {
        error!(variable = %request.target, "no variable handler found");
        return Err(Error::UnknownVariable(request.target));
    };

    let variables = resolver.resolve(&request).map_err(|e| {
        error!(variable = %request.target, error = %e, "variable handler failed");
        Error::VariableFailed(e)
    })?;
    Ok(Json(variables))
}

/// POST /tag-keys and /tag-values
pub async fn not_implemented() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

/// POST /query
pub async fn query(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: QueryRequest = decode("query", &body)?;
    info!(
        targets = request.targets.len(),
        request_id = %request.request_id,
        "query"
    );

    // Cancelled when this future is dropped, i.e. when the client disconnects.
    let cancellation = CancellationToken::new();
    let _guard = cancellation.clone().drop_guard();

    let body = state
        .dispatcher
        .dispatch_and_encode(Arc::new(request), cancellation)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to encode query response");
            Error::from(e)
        })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
