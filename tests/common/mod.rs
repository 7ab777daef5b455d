//! Shared test plumbing: routes engine tracing through the libtest
//! capture, filtered by `RUST_LOG`.

/// Installs the fmt subscriber once per test binary; later calls are
/// no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
