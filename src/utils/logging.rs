/// Initialize tracing/logging for the application.
///
/// Unknown levels fall back to `info`. Uses `try_init` so tests and the binary
/// can call this more than once without panicking.
pub fn init(default_level: &str) {
    let lvl = parse_level(default_level);

    let _ = tracing_subscriber::fmt()
        .with_max_level(lvl)
        .with_target(false)
        .try_init();
}

pub(crate) fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
