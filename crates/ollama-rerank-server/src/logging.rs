use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. Filter comes from `RERANK_LOG`, default `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("RERANK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
