use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::errors::QueryError;
use crate::core::intent::{IntentClassifier, IntentLabel};
use crate::core::llm::LlmProvider;
use crate::core::pipeline::OrchestrationPipeline;
use crate::core::responder::{Clarification, ConversationResponder};
use crate::core::types::{ConversationTurn, Envelope, SchemaMetadata};
use crate::core::warehouse::WarehouseClient;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentResponse {
    /// The question was answered by running SQL.
    Query { envelope: Envelope },
    /// SQL text only; nothing was executed.
    Sql { query: String },
    Chat { content: String },
    Clarification { clarification: Clarification },
}

impl IntentResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            IntentResponse::Query { .. } => "query",
            IntentResponse::Sql { .. } => "sql",
            IntentResponse::Chat { .. } => "chat",
            IntentResponse::Clarification { .. } => "clarification",
        }
    }
}

/// Classifies a message and hands it to the matching handler.
pub struct IntentRouter {
    classifier: IntentClassifier,
    pipeline: Arc<OrchestrationPipeline>,
    responder: ConversationResponder,
}

impl IntentRouter {
    pub fn new(
        classifier: IntentClassifier,
        pipeline: Arc<OrchestrationPipeline>,
        responder: ConversationResponder,
    ) -> Self {
        Self {
            classifier,
            pipeline,
            responder,
        }
    }

    pub fn from_config(
        llm: Arc<dyn LlmProvider>,
        warehouse: Arc<dyn WarehouseClient>,
        config: &AppConfig,
    ) -> Self {
        let classifier = IntentClassifier::new(llm.clone(), config.llm.classifier_settings());
        let pipeline = Arc::new(OrchestrationPipeline::from_config(
            llm.clone(),
            warehouse,
            config,
        ));
        let responder = ConversationResponder::new(
            llm,
            config.llm.chat_settings(),
            config.llm.clarification_settings(),
        );
        Self::new(classifier, pipeline, responder)
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn pipeline(&self) -> &Arc<OrchestrationPipeline> {
        &self.pipeline
    }

    pub async fn respond(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
    ) -> Result<IntentResponse, QueryError> {
        self.respond_with_cancel(message, schema, history, &CancellationToken::new())
            .await
    }

    pub async fn respond_with_cancel(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<IntentResponse, QueryError> {
        let intent = self
            .classifier
            .classify_with_cancel(message, history, cancel)
            .await?;
        info!("Routing message as {}", intent.as_str());

        match intent {
            IntentLabel::Ql => {
                let envelope = self
                    .pipeline
                    .orchestrate_with_cancel(message, schema, history, cancel)
                    .await;
                Ok(IntentResponse::Query { envelope })
            }
            IntentLabel::Redshift => {
                let query = self
                    .pipeline
                    .generator()
                    .generate_for(Uuid::new_v4(), message, schema, None, cancel)
                    .await?;
                Ok(IntentResponse::Sql {
                    query: query.sql().to_string(),
                })
            }
            IntentLabel::Chat => {
                let content = self.responder.reply(message, history, cancel).await?;
                Ok(IntentResponse::Chat { content })
            }
            IntentLabel::Missing => {
                let clarification = self
                    .responder
                    .clarify(message, schema, history, cancel)
                    .await?;
                Ok(IntentResponse::Clarification { clarification })
            }
        }
    }
}
