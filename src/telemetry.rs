use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise structured logging.
/// Emits JSON lines on stdout; `RUST_LOG` controls the level filter and
/// falls back to `default_filter` when unset or unparsable.
pub fn init_telemetry(default_filter: &str) {
    if try_init_telemetry(default_filter).is_err() {
        tracing::warn!("Global tracing subscriber already installed");
    }
}

/// Same as [`init_telemetry`], reporting instead of ignoring a subscriber
/// that is already installed. Integration tests call this once per spawned
/// app, so only the first call wins.
pub fn try_init_telemetry(
    default_filter: &str,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()
}
