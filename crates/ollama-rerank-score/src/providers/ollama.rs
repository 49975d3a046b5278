use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OllamaScoreConfig;
use crate::error::ProviderError;
use crate::interpret::ScaledScore;
use crate::traits::{ScoreInterpreter, ScoreProvider};
use crate::types::ScoreRequest;

#[derive(Clone)]
pub struct OllamaScoreProvider {
    config: OllamaScoreConfig,
    client: Client,
    interpreter: Arc<dyn ScoreInterpreter>,
}

impl OllamaScoreProvider {
    pub fn new(config: OllamaScoreConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            client,
            interpreter: Arc::new(ScaledScore::default()),
        })
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: Arc<dyn ScoreInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        let payload = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
            },
        };

        let res = self
            .client
            .post(self.config.generate_endpoint())
            .json(&payload)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let bytes = res.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.response)
    }
}

#[async_trait::async_trait]
impl ScoreProvider for OllamaScoreProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn score(&self, request: ScoreRequest) -> Result<f32, ProviderError> {
        if request.model.trim().is_empty() {
            return Err(ProviderError::Config("score model is empty".to_string()));
        }

        let prompt = request.prompt();
        debug!(
            model = %request.model,
            prompt_len = prompt.len(),
            "submitting scoring prompt"
        );
        let generated = self.generate(&request.model, &prompt).await?;
        let generated = generated.trim();
        let score = self.interpreter.interpret(generated);
        debug!(model = %request.model, generated, score, "scored document");
        Ok(score)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}
