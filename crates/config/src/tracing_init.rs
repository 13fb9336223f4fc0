use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber for the configured log level.
///
/// `level` is `AppConfig::log_level`, spoken in the syncer's vocabulary:
/// `debug`, `info`, `warning`, `error`. An unrecognized value falls back to
/// `debug`. A set `RUST_LOG` wins outright, so per-module directives keep
/// working.
pub fn init_tracing(level: &str) {
    let filter = match EnvFilter::try_from_env("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(level_directive(level)),
    };

    fmt().with_env_filter(filter).with_target(true).init();
}

fn level_directive(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        _ => "debug",
    }
}
