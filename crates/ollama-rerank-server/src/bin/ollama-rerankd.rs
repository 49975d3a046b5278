use std::io;
use std::sync::Arc;

use ollama_rerank_server::logging::init_tracing;
use ollama_rerank_server::{AdapterConfig, RerankServer};

#[tokio::main]
async fn main() -> io::Result<()> {
    init_tracing();
    let config = AdapterConfig::from_env()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let server = RerankServer::new(config).map_err(io::Error::other)?;
    Arc::new(server).serve_http().await
}
