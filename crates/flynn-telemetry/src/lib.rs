//! Tracing setup for the flynn binary.
//!
//! Logs go to stderr so the REPL owns stdout. The filter can be swapped at
//! runtime through the guard, which is how the `/log <filter>` command
//! adjusts verbosity without restarting.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level. Overridden by RUST_LOG when set.
    pub log_level: Level,
    /// Per-module overrides, e.g. ("flynn_llm", DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

/// Handle returned by `init_telemetry`. Keep it alive for the process
/// lifetime; dropping it does not tear the subscriber down.
pub struct TelemetryGuard {
    reload: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Replace the active filter with a new directive string
    /// (e.g. "debug,flynn_engine=trace").
    pub fn set_filter(&self, directives: &str) -> Result<(), String> {
        self.reload
            .reload(EnvFilter::new(directives))
            .map_err(|e| e.to_string())
    }
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));
    let (filter_layer, reload) = reload::Layer::new(env_filter);

    if config.json {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    TelemetryGuard { reload }
}

/// Build the default filter string from the config.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}
