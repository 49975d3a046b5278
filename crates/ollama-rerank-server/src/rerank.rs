use std::sync::Arc;

use futures::future::try_join_all;
use ollama_rerank_score::{ProviderError, ScoreProvider, ScoreRequest};
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::{
    DocumentInput, RawRerankRequest, RerankRequest, RerankResponse, ScoredDocument, Usage,
};

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] ProviderError),
}

impl RerankError {
    pub const fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Backend(_) => 500,
        }
    }
}

pub struct Reranker {
    provider: Arc<dyn ScoreProvider>,
    default_model: String,
}

impl Reranker {
    pub fn new(provider: Arc<dyn ScoreProvider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Validates the request, scores every document concurrently and returns them
    /// best-first. Any scoring failure fails the whole call.
    pub async fn rerank(&self, raw: RawRerankRequest) -> Result<RerankResponse, RerankError> {
        let request = RerankRequest::try_from(raw)?;
        let model = request
            .model
            .unwrap_or_else(|| self.default_model.clone());
        let document_count = request.documents.len();

        info!(
            provider = self.provider.name(),
            model = %model,
            query = %request.query,
            documents = document_count,
            "processing rerank request"
        );
        if let Some(first) = request.documents.first() {
            debug!(first_document = ?first, "first document structure");
        }

        let texts = request
            .documents
            .into_iter()
            .map(DocumentInput::into_text)
            .collect::<Vec<_>>();

        let scores = try_join_all(texts.iter().map(|text| {
            self.provider.score(ScoreRequest::new(
                request.query.as_str(),
                text.as_str(),
                model.as_str(),
            ))
        }))
        .await?;

        let mut results = texts
            .into_iter()
            .zip(scores)
            .enumerate()
            .map(|(index, (text, relevance_score))| ScoredDocument {
                index,
                relevance_score,
                text,
            })
            .collect::<Vec<_>>();

        // Vec::sort_by is stable: equal scores keep input order.
        results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        if let Some(top_n) = request.top_n {
            results.truncate(top_n);
        }

        info!(
            provider = self.provider.name(),
            top_score = results.first().map(|r| r.relevance_score),
            returned = results.len(),
            "rerank completed"
        );

        Ok(RerankResponse {
            results,
            model,
            usage: Usage {
                total_tokens: document_count + 1,
            },
        })
    }
}
