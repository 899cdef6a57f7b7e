//! Tracing subscriber setup.

use anyhow::{Result, anyhow};
use huddle_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the settings parse.
const FALLBACK_FILTER: &str = "info";

/// Install the global subscriber. `RUST_LOG` wins over `settings.level`.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref(), &settings.level);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

fn build_filter(rust_log: Option<&str>, level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_FILTER))
}
