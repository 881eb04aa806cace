//! Statement execution: submission and the bounded polling state machine.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::{Phase, QueryError};
use crate::core::transform::transform;
use crate::core::types::{GeneratedQuery, ResultSet};
use crate::core::warehouse::{MalformedPayload, StatementDescription, WarehouseClient};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Submitted,
    Running,
    Finished,
    Failed,
    Aborted,
    TimedOut,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "SUBMITTED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Finished => "FINISHED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Submitted | ExecutionStatus::Running)
    }
}

/// Status string reported by the warehouse, reduced to what the poll loop acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Finished,
    Failed,
    Aborted,
    /// SUBMITTED, PICKED, STARTED and anything unrecognized.
    Pending(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FINISHED" => ProviderStatus::Finished,
            "FAILED" => ProviderStatus::Failed,
            "ABORTED" => ProviderStatus::Aborted,
            other => ProviderStatus::Pending(other.to_string()),
        }
    }
}

/// A describe or fetch that failed. Payloads the warehouse sent but that could
/// not be decoded are malformed, not transient.
fn warehouse_read_error(e: anyhow::Error) -> QueryError {
    if e.downcast_ref::<MalformedPayload>().is_some() {
        QueryError::Transform(format!("{:#}", e))
    } else {
        QueryError::Poll(format!("{:#}", e))
    }
}

pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    if from == to {
        return true;
    }
    match from {
        ExecutionStatus::Submitted => !matches!(to, ExecutionStatus::Submitted),
        ExecutionStatus::Running => matches!(
            to,
            ExecutionStatus::Finished
                | ExecutionStatus::Failed
                | ExecutionStatus::Aborted
                | ExecutionStatus::TimedOut
                | ExecutionStatus::Cancelled
        ),
        ExecutionStatus::Finished
        | ExecutionStatus::Failed
        | ExecutionStatus::Aborted
        | ExecutionStatus::TimedOut
        | ExecutionStatus::Cancelled => false,
    }
}

/// One submitted statement. Owned by the request that submitted it.
///
/// The details of the terminal description (result set flag, failure
/// message) are kept so that waiting on a settled execution again reports
/// the same outcome without asking the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecution {
    id: String,
    status: ExecutionStatus,
    attempt_count: u32,
    has_result_set: bool,
    failure: Option<String>,
}

impl QueryExecution {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Submitted,
            attempt_count: 0,
            has_result_set: false,
            failure: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Move to `to` when the transition table allows it. Returns the status
    /// in effect afterwards; a terminal status is never left.
    pub fn advance(&mut self, to: ExecutionStatus) -> ExecutionStatus {
        if can_transition(self.status, to) {
            self.status = to;
        } else {
            debug!(
                "Ignoring transition {} -> {} for statement {}",
                self.status.as_str(),
                to.as_str(),
                self.id
            );
        }
        self.status
    }

    pub fn observe(&mut self, reported: &ProviderStatus) -> ExecutionStatus {
        let to = match reported {
            ProviderStatus::Finished => ExecutionStatus::Finished,
            ProviderStatus::Failed => ExecutionStatus::Failed,
            ProviderStatus::Aborted => ExecutionStatus::Aborted,
            ProviderStatus::Pending(_) => ExecutionStatus::Running,
        };
        self.advance(to)
    }

    /// Apply a full status description. Terminal details are captured only by
    /// the observation that settles the execution.
    pub fn record(&mut self, description: &StatementDescription) -> ExecutionStatus {
        let before = self.status;
        let after = self.observe(&ProviderStatus::parse(&description.status));
        if before != after {
            match after {
                ExecutionStatus::Finished => self.has_result_set = description.has_result_set,
                ExecutionStatus::Failed | ExecutionStatus::Aborted => {
                    self.failure = Some(description.error.clone().unwrap_or_else(|| {
                        format!("statement ended with status {}", description.status)
                    }));
                }
                ExecutionStatus::Submitted
                | ExecutionStatus::Running
                | ExecutionStatus::TimedOut
                | ExecutionStatus::Cancelled => {}
            }
        }
        after
    }

    pub fn has_result_set(&self) -> bool {
        self.has_result_set
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn record_pending_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub fn time_out(&mut self) -> ExecutionStatus {
        self.advance(ExecutionStatus::TimedOut)
    }

    pub fn cancel(&mut self) -> ExecutionStatus {
        self.advance(ExecutionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

pub struct ExecutionCoordinator {
    warehouse: Arc<dyn WarehouseClient>,
    policy: PollPolicy,
}

impl ExecutionCoordinator {
    pub fn new(warehouse: Arc<dyn WarehouseClient>, policy: PollPolicy) -> Self {
        Self { warehouse, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Submit and poll to completion.
    pub async fn execute(
        &self,
        query: &GeneratedQuery,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, QueryError> {
        let mut execution = self.submit(query, cancel).await?;
        self.wait_for_completion(&mut execution, cancel).await
    }

    pub async fn submit(
        &self,
        query: &GeneratedQuery,
        cancel: &CancellationToken,
    ) -> Result<QueryExecution, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled(Phase::Execution));
        }
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled(Phase::Execution)),
            res = self.warehouse.submit(query.sql()) => res,
        };
        let id = submitted
            .map_err(|e| QueryError::Submission(format!("{:#}", e)))?
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                QueryError::Submission("warehouse returned no statement id".to_string())
            })?;
        info!("Submitted statement {} for request {}", id, query.request_id());
        Ok(QueryExecution::new(id))
    }

    pub async fn wait_for_completion(
        &self,
        execution: &mut QueryExecution,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, QueryError> {
        loop {
            match execution.status() {
                ExecutionStatus::Submitted | ExecutionStatus::Running => {}
                ExecutionStatus::Finished => {
                    if !execution.has_result_set() {
                        return Ok(ResultSet::empty());
                    }
                    return self.fetch(execution, cancel).await;
                }
                ExecutionStatus::Failed | ExecutionStatus::Aborted => {
                    let message = execution.failure().unwrap_or_default().to_string();
                    return Err(QueryError::Execution(message));
                }
                ExecutionStatus::TimedOut => {
                    return Err(QueryError::Timeout {
                        attempts: execution.attempt_count(),
                    });
                }
                ExecutionStatus::Cancelled => return Err(QueryError::Cancelled(Phase::Execution)),
            }

            if cancel.is_cancelled() {
                return Err(self.abandon(execution).await);
            }
            let id = execution.id().to_string();
            let described = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = self.warehouse.describe(&id) => Some(res),
            };
            let Some(described) = described else {
                return Err(self.abandon(execution).await);
            };
            let description = described.map_err(warehouse_read_error)?;

            match execution.record(&description) {
                ExecutionStatus::Finished => {
                    if !execution.has_result_set() {
                        info!("Statement {} finished without a result set", execution.id());
                    }
                }
                ExecutionStatus::Failed | ExecutionStatus::Aborted => {
                    warn!(
                        "Statement {} failed: {}",
                        execution.id(),
                        execution.failure().unwrap_or_default()
                    );
                }
                ExecutionStatus::Submitted | ExecutionStatus::Running => {
                    let attempts = execution.record_pending_attempt();
                    debug!(
                        "Statement {} is {} (attempt {}/{})",
                        execution.id(),
                        description.status,
                        attempts,
                        self.policy.max_attempts
                    );
                    if attempts >= self.policy.max_attempts {
                        execution.time_out();
                        warn!(
                            "Statement {} timed out after {} status checks",
                            execution.id(),
                            attempts
                        );
                        continue;
                    }
                    let slept = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(self.policy.interval) => true,
                    };
                    if !slept {
                        return Err(self.abandon(execution).await);
                    }
                }
                // Never produced by an observation; settled at the top of the loop.
                ExecutionStatus::TimedOut | ExecutionStatus::Cancelled => {}
            }
        }
    }

    async fn fetch(
        &self,
        execution: &QueryExecution,
        cancel: &CancellationToken,
    ) -> Result<ResultSet, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled(Phase::Execution));
        }
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueryError::Cancelled(Phase::Execution)),
            res = self.warehouse.fetch(execution.id()) => res,
        };
        let raw = fetched.map_err(warehouse_read_error)?;

        let returned = raw.records.as_ref().map(Vec::len).unwrap_or_default();
        if let Some(total) = raw.total_num_rows
            && total > returned as i64
        {
            warn!(
                "Statement {} reported {} rows but only {} were returned in the first page",
                execution.id(),
                total,
                returned
            );
        }
        transform(raw)
    }

    /// Mark the execution cancelled and ask the warehouse to stop it.
    async fn abandon(&self, execution: &mut QueryExecution) -> QueryError {
        execution.cancel();
        if let Err(e) = self.warehouse.cancel(execution.id()).await {
            warn!("Failed to cancel statement {}: {:#}", execution.id(), e);
        } else {
            info!("Cancelled statement {}", execution.id());
        }
        QueryError::Cancelled(Phase::Execution)
    }
}
