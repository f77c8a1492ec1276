//! Logging setup

use tracing::Level;

/// Map a level name to a tracing level, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// Logs go to stderr; stdout is left alone. With `debug` set, each line
/// also carries its target, thread id and source location.
pub fn init_logging(level: &str, debug: bool) {
    use tracing_subscriber::fmt;

    fmt()
        .with_max_level(parse_level(level))
        .with_target(debug)
        .with_thread_ids(debug)
        .with_file(debug)
        .with_line_number(debug)
        .with_writer(std::io::stderr)
        .init();
}
