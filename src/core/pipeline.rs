use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::core::config::AppConfig;
use crate::core::errors::{Phase, QueryError};
use crate::core::execution::ExecutionCoordinator;
use crate::core::generator::QueryGenerator;
use crate::core::insight::InsightSynthesizer;
use crate::core::llm::LlmProvider;
use crate::core::types::{ConversationTurn, Envelope, ErrorType, GeneratedQuery, SchemaMetadata};
use crate::core::warehouse::WarehouseClient;

/// Envelope for a failed run. Generation failures carry no query; anything
/// after a query exists reports it alongside the error.
pub fn error_envelope(error: &QueryError, query: Option<&GeneratedQuery>) -> Envelope {
    match error.phase() {
        Phase::Classification | Phase::Generation => Envelope::Error {
            error: error.to_string(),
            error_type: ErrorType::GenerationError,
            query: None,
        },
        Phase::Execution | Phase::Synthesis => Envelope::Error {
            error: error.to_string(),
            error_type: ErrorType::ExecutionError,
            query: query.map(|q| q.sql().to_string()),
        },
    }
}

/// generate -> execute -> transform -> synthesize, for one message at a time.
pub struct OrchestrationPipeline {
    generator: QueryGenerator,
    coordinator: ExecutionCoordinator,
    synthesizer: InsightSynthesizer,
    deadline: Option<Duration>,
}

impl OrchestrationPipeline {
    pub fn new(
        generator: QueryGenerator,
        coordinator: ExecutionCoordinator,
        synthesizer: InsightSynthesizer,
    ) -> Self {
        Self {
            generator,
            coordinator,
            synthesizer,
            deadline: None,
        }
    }

    pub fn from_config(
        llm: Arc<dyn LlmProvider>,
        warehouse: Arc<dyn WarehouseClient>,
        config: &AppConfig,
    ) -> Self {
        let generator = QueryGenerator::new(llm.clone(), config.llm.sql_settings());
        let coordinator = ExecutionCoordinator::new(warehouse, config.warehouse.poll_policy());
        let synthesizer = InsightSynthesizer::new(llm, config.llm.insight_settings())
            .with_max_rows(config.insights.max_rows)
            .with_style(config.insights.style);
        Self::new(generator, coordinator, synthesizer).with_deadline(config.pipeline.deadline())
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn generator(&self) -> &QueryGenerator {
        &self.generator
    }

    pub async fn orchestrate(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
    ) -> Envelope {
        self.orchestrate_with_cancel(message, schema, history, &CancellationToken::new())
            .await
    }

    pub async fn orchestrate_with_cancel(
        &self,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Envelope {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline", request_id = %request_id);

        async move {
            let token = cancel.child_token();
            let timer = self.deadline.map(|deadline| {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    token.cancel();
                })
            });

            let envelope = self.run(request_id, message, schema, history, &token).await;

            if let Some(timer) = timer {
                timer.abort();
            }
            if token.is_cancelled()
                && !cancel.is_cancelled()
                && let (Some(deadline), Envelope::Error { error, .. }) = (self.deadline, &envelope)
            {
                warn!("Request exceeded its {}s deadline: {}", deadline.as_secs(), error);
            }
            envelope
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        message: &str,
        schema: &SchemaMetadata,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Envelope {
        info!("Phase: generation");
        let query = match self
            .generator
            .generate_for(request_id, message, schema, Some(history), cancel)
            .await
        {
            Ok(query) => query,
            Err(e) => {
                warn!("Generation failed: {}", e);
                return error_envelope(&e, None);
            }
        };

        info!("Phase: execution");
        let result = match self.coordinator.execute(&query, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Execution failed: {}", e);
                return error_envelope(&e, Some(&query));
            }
        };

        info!(
            "Phase: synthesis ({} rows, {} columns)",
            result.row_count(),
            result.column_count()
        );
        let insights = match self
            .synthesizer
            .synthesize_with_cancel(&result, message, history, cancel)
            .await
        {
            Ok(insights) => insights,
            Err(e) => {
                warn!("Synthesis failed: {}", e);
                return error_envelope(&e, Some(&query));
            }
        };

        info!("Request complete");
        Envelope::Success {
            query: query.sql().to_string(),
            result,
            insights,
        }
    }
}
