pub mod config;
pub mod logging;
pub mod protocol;
pub mod rerank;
pub mod server;

pub use config::{AdapterConfig, ConfigError};
pub use protocol::{
    DocumentInput, RawRerankRequest, RerankRequest, RerankResponse, ScoredDocument, Usage,
};
pub use rerank::{RerankError, Reranker};
pub use server::RerankServer;
