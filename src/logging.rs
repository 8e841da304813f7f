/// Logging initialization for cidgate.
///
/// Structured logging via the `tracing` ecosystem: pretty console output
/// by default, JSON for machine parsing. `RUST_LOG` overrides the
/// configured level at runtime.
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Output logs as JSON.
    pub json: bool,
    /// Default to DEBUG instead of INFO.
    pub verbose: bool,
}

/// Initialize the tracing subscriber. Call once, early in main.
pub fn init(settings: &LogSettings) {
    let default_level = if settings.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cidgate={default_level},tower_http=info")));

    let registry = tracing_subscriber::registry().with(filter);

    if settings.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
