//! Tracing/logging setup shared by anything hosting the job storage layer.

/// Initialize process-wide tracing with JSON output.
///
/// Filter comes from `RUST_LOG`, defaulting to `info` with storage
/// operations at `debug`. Safe to call multiple times; subsequent calls
/// become no-ops.
pub fn init() {
    init_with_default("info,jobtrack_infra=debug");
}

/// Initialize with an explicit default filter (tests, embedded hosts).
///
/// `RUST_LOG` still wins when set.
pub fn init_with_default(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
