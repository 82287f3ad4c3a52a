use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Logger configuration.
///
/// `env_filter` follows the `tracing_subscriber::EnvFilter` syntax
/// (e.g. `"info"`, `"reel_runtime=debug,reel_runtime_glow=warn"`).
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub with_target: bool,
}

static INIT: Once = Once::new();

/// Installs the global `tracing` subscriber once. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = match config.env_filter {
            Some(f) => EnvFilter::new(f),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        // A host may already have installed its own subscriber.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .try_init();

        tracing::debug!("logging initialized");
    });
}
