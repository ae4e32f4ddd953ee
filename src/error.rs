use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::codec::EncodeError;

/// Error type returned by query handlers and resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that end an HTTP request with a non-200 status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("no variable handler found for '{0}'")]
    UnknownVariable(String),

    #[error("variables: {0}")]
    VariableFailed(BoxError),

    #[error("invalid request: target '{0}' does not have a metric payload option function")]
    MissingPayloadOptions(String),

    #[error("metric payload options: {0}")]
    PayloadOptionsFailed(BoxError),

    #[error("query: {0}")]
    Encode(#[from] EncodeError),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) | Error::UnknownVariable(_) => StatusCode::BAD_REQUEST,
            Error::VariableFailed(_)
            | Error::MissingPayloadOptions(_)
            | Error::PayloadOptionsFailed(_)
            | Error::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// Why a query target was left out of a `/query` response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid query target: {0}")]
    UnknownTarget(String),

    #[error("query '{target}' failed: {source}")]
    Handler {
        target: String,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
