use tracing_subscriber::EnvFilter;

/// Routes `log` records through a `tracing` fmt subscriber, `RUST_LOG`
/// overriding the default `info` level.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();
}
