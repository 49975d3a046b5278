use std::time::Duration;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaScoreConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub temperature: f32,
    /// Output cap in tokens. Enough for a short number, not for prose.
    pub num_predict: u32,
}

impl OllamaScoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
            temperature: 0.0,
            num_predict: 10,
        }
    }

    pub fn generate_endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OllamaScoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_BASE_URL)
    }
}
