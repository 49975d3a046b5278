use std::time::Duration;

use ollama_rerank_score::{DEFAULT_OLLAMA_BASE_URL, DEFAULT_SCORE_SCALE, OllamaScoreConfig};
use thiserror::Error;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 11435;
pub const DEFAULT_MODEL: &str = "dengcao/Qwen3-Reranker-8B:Q5_K_M";
pub const SERVICE_NAME: &str = "Ollama Rerank Adapter";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub host: String,
    pub port: u16,
    pub ollama_base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub num_predict: u32,
    pub score_scale: f32,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match var("PORT") {
            Some(raw) => parse_number::<u16>("PORT", &raw)?,
            None => DEFAULT_PORT,
        };
        let ollama_base_url =
            var("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        let default_model = var("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout = match var("OLLAMA_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("OLLAMA_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(120),
        };
        let num_predict = match var("OLLAMA_NUM_PREDICT") {
            Some(raw) => parse_number::<u32>("OLLAMA_NUM_PREDICT", &raw)?,
            None => 10,
        };
        let score_scale = match var("RERANK_SCORE_SCALE") {
            Some(raw) => {
                let scale = parse_number::<f32>("RERANK_SCORE_SCALE", &raw)?;
                if !scale.is_finite() || scale <= 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "RERANK_SCORE_SCALE",
                        value: raw,
                        reason: "must be a positive number",
                    });
                }
                scale
            }
            None => DEFAULT_SCORE_SCALE,
        };

        Ok(Self {
            host,
            port,
            ollama_base_url,
            default_model,
            timeout,
            num_predict,
            score_scale,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn score_config(&self) -> OllamaScoreConfig {
        let mut cfg = OllamaScoreConfig::new(self.ollama_base_url.clone());
        cfg.timeout = self.timeout;
        cfg.num_predict = self.num_predict;
        cfg
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
            num_predict: 10,
            score_scale: DEFAULT_SCORE_SCALE,
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: "not a number",
    })
}
