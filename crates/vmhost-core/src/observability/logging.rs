use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "vmhost=info,vmhost_core=info,vmhost_runtime=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact output.
    Human,
    /// Structured JSON output (for orchestrators that ship logs).
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Call once at program startup from the embedding orchestrator. Respects
/// `RUST_LOG`. Returns false if a global subscriber was already installed.
pub fn init(format: LogFormat) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .is_ok()
        }
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .is_ok()
        }
    }
}
