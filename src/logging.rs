use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that reads its filter from `RUST_LOG`,
/// defaulting to `info` when unset. Intended for binaries embedding this
/// crate; library code should never install a subscriber itself, only emit
/// through `tracing`'s macros.
pub fn init_default_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
