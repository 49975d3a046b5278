use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rerank::RerankError;

/// Rerank body as received. Every field is optional so shape problems surface as
/// validation errors instead of generic decode failures.
#[derive(Debug, Default, Deserialize)]
pub struct RawRerankRequest {
    #[serde(default)]
    pub query: Value,
    #[serde(default)]
    pub documents: Value,
    #[serde(default)]
    pub top_n: Value,
    #[serde(default)]
    pub model: Value,
}

#[derive(Debug, Clone)]
pub struct RerankRequest {
    pub query: String,
    pub documents: Vec<DocumentInput>,
    pub top_n: Option<usize>,
    pub model: Option<String>,
}

impl TryFrom<RawRerankRequest> for RerankRequest {
    type Error = RerankError;

    fn try_from(raw: RawRerankRequest) -> Result<Self, Self::Error> {
        let query = match raw.query {
            Value::String(q) if !q.is_empty() => q,
            _ => {
                return Err(RerankError::Validation(
                    "Missing required parameter: query".to_string(),
                ));
            }
        };

        let documents = match raw.documents {
            Value::Array(items) if !items.is_empty() => {
                items.into_iter().map(DocumentInput::from).collect()
            }
            _ => {
                return Err(RerankError::Validation(
                    "Missing or invalid parameter: documents".to_string(),
                ));
            }
        };

        let top_n = match raw.top_n {
            Value::Null => None,
            Value::Number(n) => match n.as_u64().or_else(|| integral_f64(n.as_f64())) {
                Some(0) => None,
                Some(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
                None => {
                    return Err(RerankError::Validation(
                        "Invalid parameter: top_n must be a positive integer".to_string(),
                    ));
                }
            },
            _ => {
                return Err(RerankError::Validation(
                    "Invalid parameter: top_n must be a positive integer".to_string(),
                ));
            }
        };

        let model = match raw.model {
            Value::String(m) if !m.is_empty() => Some(m),
            _ => None,
        };

        Ok(Self {
            query,
            documents,
            top_n,
            model,
        })
    }
}

/// `2.0` is accepted as `2`; fractional and negative values are not.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn integral_f64(value: Option<f64>) -> Option<u64> {
    value
        .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as u64)
}

/// One entry of the `documents` array.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentInput {
    Text(String),
    Object(Map<String, Value>),
    Other(Value),
}

impl From<Value> for DocumentInput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s),
            Value::Object(map) => Self::Object(map),
            other => Self::Other(other),
        }
    }
}

impl DocumentInput {
    /// Plain text used for scoring and echoed back in the result.
    ///
    /// Accepts `"..."`, `{"text": "..."}` and `{"text": {"text": "..."}}`; any other
    /// shape is scored as its compact JSON form.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Object(map) => match object_text(&map) {
                Some(text) => text.to_string(),
                None => Value::Object(map).to_string(),
            },
            Self::Other(v) => v.to_string(),
        }
    }
}

fn object_text(map: &Map<String, Value>) -> Option<&str> {
    match map.get("text")? {
        Value::String(s) => Some(s),
        Value::Object(inner) => match inner.get("text")? {
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub index: usize,
    pub relevance_score: f32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RerankResponse {
    pub results: Vec<ScoredDocument>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Usage {
    pub total_tokens: usize,
}
