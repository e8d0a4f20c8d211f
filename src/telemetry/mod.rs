//! Tracing subscriber initialization from environment settings.
//!
//! `LOG_LEVEL` takes any env-filter directive (`info`,
//! `hyperfleet_adapter=debug,info`, ...), `LOG_FORMAT` selects `text` or
//! `json`, `LOG_OUTPUT` selects `stdout` or `stderr`.

use miette::Diagnostic;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::settings::LogSettings;

/// Subscriber installation failure (usually: already initialized).
#[derive(Debug, Error, Diagnostic)]
pub enum TelemetryError {
    #[error("failed to initialize tracing subscriber: {0}")]
    #[diagnostic(code(hyperfleet::telemetry::init))]
    Init(String),
}

/// Installs the global tracing subscriber.
pub fn init(settings: &LogSettings) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = settings.format.eq_ignore_ascii_case("json");
    let stderr = settings.output.eq_ignore_ascii_case("stderr");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match (json, stderr) {
        (true, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (true, false) => builder.json().try_init(),
        (false, true) => builder.with_writer(std::io::stderr).try_init(),
        (false, false) => builder.try_init(),
    };
    result.map_err(|err| TelemetryError::Init(err.to_string()))
}
