use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::ScoreRequest;

#[async_trait]
pub trait ScoreProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relevance of `request.document` to `request.query`, always within `[0, 1]`.
    async fn score(&self, request: ScoreRequest) -> Result<f32, ProviderError>;
}

/// Turns free-form generated text into a relevance score.
pub trait ScoreInterpreter: Send + Sync {
    fn interpret(&self, generated: &str) -> f32;
}
