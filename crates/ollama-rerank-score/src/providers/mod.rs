pub mod ollama;

pub use ollama::OllamaScoreProvider;
