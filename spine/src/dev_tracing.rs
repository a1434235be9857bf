//! Opt-in log output for examples, benches and tests.

/// Install a `fmt` subscriber filtered by `RUST_LOG`, if it is set.
///
/// Benches and tests can call `spine::dev_tracing::init_tracing()` to see
/// the engine's `[REQ]`, `[PIPE]`, `[ENDPOINT]` logs. This is a no-op when
/// `RUST_LOG` is unset or a global subscriber is already installed.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_thread_names(true)
            .try_init();
    }
}
