use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::errors::{Phase, QueryError};
use crate::core::llm::{self, LlmProvider, ModelRequest, ModelSettings, StreamError};
use crate::core::prompts;
use crate::core::types::{ConversationTurn, Insight, ResultSet};

/// Rows of a result set embedded into the insight prompt by default.
pub const DEFAULT_MAX_ROWS: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStyle {
    /// Summary, trends, outliers and recommendations.
    #[default]
    Narrative,
    /// A direct answer to the question.
    Answer,
}

pub struct InsightSynthesizer {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
    max_rows: usize,
    style: InsightStyle,
}

impl InsightSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self {
            llm,
            settings,
            max_rows: DEFAULT_MAX_ROWS,
            style: InsightStyle::default(),
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_style(mut self, style: InsightStyle) -> Self {
        self.style = style;
        self
    }

    pub async fn synthesize(
        &self,
        result: &ResultSet,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<Insight, QueryError> {
        self.synthesize_with_cancel(result, question, history, &CancellationToken::new())
            .await
    }

    pub async fn synthesize_with_cancel(
        &self,
        result: &ResultSet,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<Insight, QueryError> {
        let prompt =
            prompts::build_insight_prompt(result, question, history, self.max_rows, self.style);
        let text = llm::complete(&self.llm, ModelRequest::new(&self.settings, prompt), cancel)
            .await
            .map_err(|e| match e {
                StreamError::Cancelled => QueryError::Cancelled(Phase::Synthesis),
                other => QueryError::Synthesis(other.to_string()),
            })?;
        info!(
            "Synthesized insights over {} of {} rows",
            result.row_count().min(self.max_rows),
            result.total_num_rows
        );
        Ok(Insight(text))
    }
}
