//! Tracing initialisation.

use lifeline_core::ConfigError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `"lifeline_timeline=debug,info"`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// # Environment Variables
    /// - `LIFELINE_LOG` (default: "info")
    /// - `LIFELINE_LOG_JSON` ("true" or "1" enables JSON output)
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var("LIFELINE_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
            json: std::env::var("LIFELINE_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails instead of panicking when the filter is invalid or a subscriber is
/// already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter =
        EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
            field: "LIFELINE_LOG".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        })?;

    let json_layer = config.json.then(|| fmt::layer().json());
    let text_layer = (!config.json).then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing".to_string(),
            value: "global subscriber".to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}
