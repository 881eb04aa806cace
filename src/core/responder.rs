use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::errors::{Phase, QueryError};
use crate::core::llm::{self, LlmProvider, ModelRequest, ModelSettings, StreamError};
use crate::core::prompts;
use crate::core::types::{ConversationTurn, SchemaMetadata};

/// What a request lacks and how to ask for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clarification {
    pub missing_info: String,
    #[serde(default)]
    pub questions: Vec<String>,
}

/// Pull a JSON object out of model output. Tries a fenced block first, then
/// the outermost `{ ... }` span.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let content_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let after = &after[content_start..];
        if let Some(end) = after.find("```") {
            let block = after[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Handles the conversational intents: free-form replies and clarifying
/// questions when a request lacks information.
pub struct ConversationResponder {
    llm: Arc<dyn LlmProvider>,
    chat_settings: ModelSettings,
    clarification_settings: ModelSettings,
}

impl ConversationResponder {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        chat_settings: ModelSettings,
        clarification_settings: ModelSettings,
    ) -> Self {
        Self {
            llm,
            chat_settings,
            clarification_settings,
        }
    }

    pub async fn reply(
        &self,
        message: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<String, QueryError> {
        let prompt = prompts::build_chat_prompt(message, history);
        llm::complete(&self.llm, ModelRequest::new(&self.chat_settings, prompt), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Cancelled => QueryError::Cancelled(Phase::Generation),
                other => QueryError::Generation(other.to_string()),
            })
    }

    pub async fn clarify(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<Clarification, QueryError> {
        let prompt = prompts::build_clarification_prompt(message, schema, history);
        let text = llm::complete(
            &self.llm,
            ModelRequest::new(&self.clarification_settings, prompt),
            cancel,
        )
        .await
        .map_err(|e| match e {
            StreamError::Cancelled => QueryError::Cancelled(Phase::Generation),
            other => QueryError::Generation(other.to_string()),
        })?;

        let clarification = extract_json_object(&text)
            .and_then(|json| serde_json::from_str::<Clarification>(json).ok())
            .ok_or_else(|| {
                warn!("Clarification output was not valid JSON: {:?}", text);
                QueryError::Generation("clarification response was not valid JSON".to_string())
            })?;
        info!(
            "Asking {} follow-up question(s)",
            clarification.questions.len()
        );
        Ok(clarification)
    }
}
