use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::Level;

use crate::logging::LogFormat;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var} '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Prometheus naming for the query metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub namespace: String,
    pub subsystem: String,
    pub application: String,
}

/// Process-level settings of a JSON API server.
///
/// | variable                         | default        |
/// |----------------------------------|----------------|
/// | `JSON_SERVER_ADDR`               | `0.0.0.0:8080` |
/// | `PORT`                           | port of the address above |
/// | `JSON_SERVER_REQUEST_LOG_LEVEL`  | `debug`        |
/// | `JSON_SERVER_LOG_FORMAT`         | `compact`      |
/// | `JSON_SERVER_METRICS_NAMESPACE`  | unset, no Prometheus metrics |
/// | `JSON_SERVER_METRICS_SUBSYSTEM`  | empty          |
/// | `JSON_SERVER_APPLICATION`        | crate name     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub request_log_level: Level,
    pub log_format: LogFormat,
    pub metrics: Option<MetricsConfig>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr_var = lookup("JSON_SERVER_ADDR");
        let addr_value = addr_var.as_deref().unwrap_or(DEFAULT_ADDR);
        let mut addr: SocketAddr = addr_value
            .parse()
            .map_err(|e| ConfigError::invalid("JSON_SERVER_ADDR", addr_value, e))?;

        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| ConfigError::invalid("PORT", &port, e))?;
            addr.set_port(port);
        }

        let request_log_level = match lookup("JSON_SERVER_REQUEST_LOG_LEVEL") {
            Some(level) => level
                .parse()
                .map_err(|e| ConfigError::invalid("JSON_SERVER_REQUEST_LOG_LEVEL", &level, e))?,
            None => Level::DEBUG,
        };

        let log_format = match lookup("JSON_SERVER_LOG_FORMAT").as_deref() {
            None => LogFormat::Compact,
            Some(f) if f.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "JSON_SERVER_LOG_FORMAT",
                    other,
                    "expected 'compact' or 'json'",
                ))
            }
        };

        let metrics = lookup("JSON_SERVER_METRICS_NAMESPACE").map(|namespace| MetricsConfig {
            namespace,
            subsystem: lookup("JSON_SERVER_METRICS_SUBSYSTEM").unwrap_or_default(),
            application: lookup("JSON_SERVER_APPLICATION")
                .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
        });

        Ok(Self {
            addr,
            request_log_level,
            log_format,
            metrics,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_log_level: Level::DEBUG,
            log_format: LogFormat::Compact,
            metrics: None,
        }
    }
}
