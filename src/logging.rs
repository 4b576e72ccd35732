//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for `verbose`.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
}

/// Debug-level logging captured by the test harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
