pub mod config;
pub mod error;
pub mod interpret;
pub mod providers;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::ProviderError;
pub use interpret::*;
pub use providers::OllamaScoreProvider;
pub use traits::*;
pub use types::*;
