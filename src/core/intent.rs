use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::errors::{Phase, QueryError};
use crate::core::llm::{self, LlmProvider, ModelRequest, ModelSettings, StreamError};
use crate::core::prompts;
use crate::core::types::ConversationTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Chat,
    Ql,
    Redshift,
    Missing,
}

impl IntentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentLabel::Chat => "chat",
            IntentLabel::Ql => "ql",
            IntentLabel::Redshift => "redshift",
            IntentLabel::Missing => "missing",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "chat" => Some(IntentLabel::Chat),
            "ql" => Some(IntentLabel::Ql),
            "redshift" => Some(IntentLabel::Redshift),
            "missing" => Some(IntentLabel::Missing),
            _ => None,
        }
    }
}

/// Trim, lowercase and strip quoting or trailing punctuation from raw model output.
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '!'))
        .trim()
        .to_lowercase()
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self { llm, settings }
    }

    pub async fn classify(
        &self,
        message: &str,
        history: &[ConversationTurn],
    ) -> Result<IntentLabel, QueryError> {
        self.classify_with_cancel(message, history, &CancellationToken::new())
            .await
    }

    pub async fn classify_with_cancel(
        &self,
        message: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<IntentLabel, QueryError> {
        let prompt = prompts::build_classifier_prompt(message, history);
        let raw = llm::complete(&self.llm, ModelRequest::new(&self.settings, prompt), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Cancelled => QueryError::Cancelled(Phase::Classification),
                other => QueryError::Classification(other.to_string()),
            })?;

        let normalized = normalize_label(&raw);
        match IntentLabel::from_label(&normalized) {
            Some(label) => {
                info!("Detected intent: {}", label.as_str());
                Ok(label)
            }
            None => {
                warn!("Classifier returned unrecognized label: {:?}", raw);
                Err(QueryError::Classification(format!(
                    "unrecognized intent label {:?}",
                    raw
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::ScriptedLlm;

    fn classifier(llm: Arc<ScriptedLlm>) -> IntentClassifier {
        IntentClassifier::new(
            llm,
            ModelSettings {
                model: "test-model".to_string(),
                max_tokens: 10,
            },
        )
    }

    #[test]
    fn labels_round_trip_through_their_names() {
        for label in [
            IntentLabel::Chat,
            IntentLabel::Ql,
            IntentLabel::Redshift,
            IntentLabel::Missing,
        ] {
            assert_eq!(IntentLabel::from_label(label.as_str()), Some(label));
        }
        assert_eq!(IntentLabel::from_label("sql"), None);
    }

    #[test]
    fn normalize_strips_noise() {
        assert_eq!(normalize_label("  QL\n"), "ql");
        assert_eq!(normalize_label("\"Chat\"."), "chat");
        assert_eq!(normalize_label("`missing`"), "missing");
    }

    #[tokio::test]
    async fn classify_maps_model_output_to_label() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&[" Q", "L\n"]);
        let label = classifier(llm.clone())
            .classify("average temperature last 30 days", &[])
            .await
            .unwrap();
        assert_eq!(label, IntentLabel::Ql);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, 10);
        assert!(requests[0].prompt.contains("average temperature last 30 days"));
    }

    #[tokio::test]
    async fn unknown_label_is_an_error_not_a_default() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text(&["sql"]);
        let err = classifier(llm).classify("hi", &[]).await.unwrap_err();
        assert!(matches!(err, QueryError::Classification(_)));
        assert!(err.to_string().contains("sql"));
    }

    #[tokio::test]
    async fn model_failure_is_a_classification_error() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_failure("throttled");
        let err = classifier(llm).classify("hi", &[]).await.unwrap_err();
        assert!(matches!(err, QueryError::Classification(_)));
        assert!(err.to_string().contains("throttled"));
    }
}
