use regex::Regex;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::errors::{Phase, QueryError};
use crate::core::llm::{self, LlmProvider, ModelRequest, ModelSettings, StreamError};
use crate::core::prompts;
use crate::core::types::{ConversationTurn, GeneratedQuery, SchemaMetadata};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\n(.*?)\n?\s*```$").expect("valid code fence regex")
});

/// Remove one surrounding markdown code fence, if the whole text is fenced.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

#[derive(Clone)]
pub struct QueryGenerator {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self { llm, settings }
    }

    pub async fn generate(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
    ) -> Result<GeneratedQuery, QueryError> {
        self.generate_for(
            Uuid::new_v4(),
            message,
            schema,
            Some(history),
            &CancellationToken::new(),
        )
        .await
    }

    /// SQL for a one-off request, without conversation context.
    pub async fn generate_standalone(
        &self,
        message: &str,
        schema: &SchemaMetadata,
    ) -> Result<GeneratedQuery, QueryError> {
        self.generate_for(
            Uuid::new_v4(),
            message,
            schema,
            None,
            &CancellationToken::new(),
        )
        .await
    }

    pub async fn generate_for(
        &self,
        request_id: Uuid,
        message: &str,
        schema: &SchemaMetadata,
        history: Option<&[ConversationTurn]>,
        cancel: &CancellationToken,
    ) -> Result<GeneratedQuery, QueryError> {
        let prompt = prompts::build_sql_prompt(message, schema, history);
        let text = llm::complete(&self.llm, ModelRequest::new(&self.settings, prompt), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Cancelled => QueryError::Cancelled(Phase::Generation),
                other => QueryError::Generation(other.to_string()),
            })?;

        let sql = strip_code_fence(&text);
        if sql.is_empty() {
            return Err(QueryError::Generation(
                "model returned an empty query".to_string(),
            ));
        }
        info!("Generated SQL for request {}", request_id);
        debug!("SQL: {}", sql);
        Ok(GeneratedQuery::new(request_id, sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ScriptedLlm;
    use proptest::prelude::*;

    fn generator(llm: Arc<ScriptedLlm>) -> QueryGenerator {
        QueryGenerator::new(
            llm,
            ModelSettings {
                model: "test-model".to_string(),
                max_tokens: 1000,
            },
        )
    }

    fn schema() -> SchemaMetadata {
        SchemaMetadata::new(serde_json::json!({"scada": {"readings": ["ts", "temp"]}}))
    }

    #[test]
    fn fence_with_language_is_stripped() {
        assert_eq!(
            strip_code_fence("```sql\nSELECT 1;\n```"),
            "SELECT 1;"
        );
        assert_eq!(strip_code_fence("```\nSELECT 2\n```"), "SELECT 2");
    }

    #[test]
    fn unfenced_text_is_only_trimmed() {
        assert_eq!(strip_code_fence("  SELECT 1  "), "SELECT 1");
        assert_eq!(
            strip_code_fence("SELECT '```' AS tick"),
            "SELECT '```' AS tick"
        );
    }

    #[tokio::test]
    async fn generate_concatenates_and_trims_deltas() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["  SELECT AVG(temp) ", "FROM scada.readings;\n"]);
        let query = generator(llm.clone())
            .generate("average temp", &schema(), &[ConversationTurn::user("hi")])
            .await
            .unwrap();
        assert_eq!(query.sql(), "SELECT AVG(temp) FROM scada.readings;");

        let prompt = &llm.requests()[0].prompt;
        assert!(prompt.contains("user: hi"));
        assert!(prompt.contains("\"readings\""));
    }

    #[tokio::test]
    async fn standalone_prompt_has_no_history() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["SELECT * FROM scada.readings LIMIT 10"]);
        generator(llm.clone())
            .generate_standalone("last 10 rows", &schema())
            .await
            .unwrap();
        assert!(!llm.requests()[0].prompt.contains("conversation history"));
    }

    #[tokio::test]
    async fn whitespace_only_output_is_a_generation_error() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["  ", "\n"]);
        let err = generator(llm)
            .generate("q", &schema(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Generation(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_a_generation_error() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_broken_stream(&["SELECT"], "stream reset");
        let err = generator(llm)
            .generate("q", &schema(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Generation(_)));
        assert!(err.to_string().contains("stream reset"));
    }

    #[tokio::test]
    async fn cancelled_before_call_makes_no_model_request() {
        let llm = Arc::new(ScriptedLlm::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = generator(llm.clone())
            .generate_for(Uuid::new_v4(), "q", &schema(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled(Phase::Generation)));
        assert_eq!(llm.call_count(), 0);
    }

    proptest! {
        #[test]
        fn generated_sql_is_never_blank_or_padded(
            deltas in proptest::collection::vec("[ \\nA-Za-z0-9*;]{0,12}", 1..6)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let llm = Arc::new(ScriptedLlm::new());
            let refs: Vec<&str> = deltas.iter().map(String::as_str).collect();
            llm.push_text(&refs);
            let outcome = rt.block_on(generator(llm).generate("q", &schema(), &[]));
            match outcome {
                Ok(query) => {
                    prop_assert!(!query.sql().is_empty());
                    prop_assert_eq!(query.sql(), query.sql().trim());
                }
                Err(err) => {
                    prop_assert!(matches!(err, QueryError::Generation(_)));
                    prop_assert!(deltas.concat().trim().is_empty());
                }
            }
        }
    }
}
