#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub query: String,
    pub document: String,
    pub model: String,
}

impl ScoreRequest {
    pub fn new(
        query: impl Into<String>,
        document: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            document: document.into(),
            model: model.into(),
        }
    }

    /// Prompt sent to the generation model. Query and document are embedded verbatim.
    pub fn prompt(&self) -> String {
        format!(
            "Query: {}\nDocument: {}\nRelevance score:",
            self.query, self.document
        )
    }
}
