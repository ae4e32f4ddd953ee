use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable single-line events.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// The filter used when `RUST_LOG` is unset or invalid.
pub fn default_filter() -> String {
    format!("{}={}", env!("CARGO_CRATE_NAME"), Level::INFO)
}

/// Sets up the logging subscriber for the application.
///
/// `RUST_LOG` takes precedence over [`default_filter`]. Fails if a global
/// subscriber is already installed.
pub fn init_logger(format: LogFormat) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let fmt_layer = match format {
        LogFormat::Compact => fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
}
