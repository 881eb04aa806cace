//! Scripted stand-ins for the model and the warehouse. Used by unit tests and
//! by the integration suite under `tests/`.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::core::llm::{LlmProvider, ModelRequest, StreamEvent, TextStream};
use crate::core::warehouse::{RawStatementResult, StatementDescription, WarehouseClient};

enum LlmScript {
    Text(Vec<String>),
    Failure(String),
    BrokenStream(Vec<String>, String),
    Hang,
}

/// Model double that replays queued responses in order, one per call.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<VecDeque<LlmScript>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response streamed as the given text deltas, then `Stop`.
    pub fn push_text(&self, deltas: &[&str]) {
        self.push(LlmScript::Text(deltas.iter().map(|d| d.to_string()).collect()));
    }

    /// Queue a failure to open the stream.
    pub fn push_failure(&self, message: &str) {
        self.push(LlmScript::Failure(message.to_string()));
    }

    /// Queue a stream that yields `deltas` and then a transport error.
    pub fn push_broken_stream(&self, deltas: &[&str], message: &str) {
        self.push(LlmScript::BrokenStream(
            deltas.iter().map(|d| d.to_string()).collect(),
            message.to_string(),
        ));
    }

    /// Queue a stream that never produces an event.
    pub fn push_hang(&self) {
        self.push(LlmScript::Hang);
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn push(&self, script: LlmScript) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<TextStream> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let script = self
            .scripts
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted model response left"))?;

        match script {
            LlmScript::Text(deltas) => {
                let mut events: Vec<Result<StreamEvent>> = vec![Ok(StreamEvent::Other(
                    "message_start".to_string(),
                ))];
                events.extend(deltas.into_iter().map(|d| Ok(StreamEvent::TextDelta(d))));
                events.push(Ok(StreamEvent::Stop));
                Ok(Box::pin(tokio_stream::iter(events)))
            }
            LlmScript::Failure(message) => Err(anyhow!(message)),
            LlmScript::BrokenStream(deltas, message) => {
                let mut events: Vec<Result<StreamEvent>> = deltas
                    .into_iter()
                    .map(|d| Ok(StreamEvent::TextDelta(d)))
                    .collect();
                events.push(Err(anyhow!(message)));
                Ok(Box::pin(tokio_stream::iter(events)))
            }
            LlmScript::Hang => Ok(Box::pin(tokio_stream::pending())),
        }
    }
}

enum SubmitScript {
    Id(String),
    NoId,
    Failure(String),
}

/// Warehouse double. `describe` replays queued statuses, then repeats the
/// fallback status forever.
pub struct ScriptedWarehouse {
    submit: SubmitScript,
    statuses: Mutex<VecDeque<Result<StatementDescription, String>>>,
    fallback: StatementDescription,
    result: Result<RawStatementResult, String>,
    cancel_after: Option<(usize, CancellationToken)>,
    submitted: Mutex<Vec<String>>,
    describe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl Default for ScriptedWarehouse {
    fn default() -> Self {
        Self {
            submit: SubmitScript::Id("stmt-1".to_string()),
            statuses: Mutex::new(VecDeque::new()),
            fallback: StatementDescription::new("RUNNING"),
            result: Ok(RawStatementResult::default()),
            cancel_after: None,
            submitted: Mutex::new(Vec::new()),
            describe_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statement_id(mut self, id: &str) -> Self {
        self.submit = SubmitScript::Id(id.to_string());
        self
    }

    pub fn without_statement_id(mut self) -> Self {
        self.submit = SubmitScript::NoId;
        self
    }

    pub fn with_submit_failure(mut self, message: &str) -> Self {
        self.submit = SubmitScript::Failure(message.to_string());
        self
    }

    /// Queue plain statuses (`RUNNING`, `PICKED`, ...).
    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.extend(statuses.iter().map(|s| Ok(StatementDescription::new(s))));
        }
        self
    }

    pub fn then_finished(self, has_result_set: bool) -> Self {
        self.then(StatementDescription {
            has_result_set,
            ..StatementDescription::new("FINISHED")
        })
    }

    pub fn then_failed(self, status: &str, error: &str) -> Self {
        self.then(StatementDescription {
            error: Some(error.to_string()),
            ..StatementDescription::new(status)
        })
    }

    pub fn then_describe_error(self, message: &str) -> Self {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.push_back(Err(message.to_string()));
        }
        self
    }

    pub fn then(self, description: StatementDescription) -> Self {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.push_back(Ok(description));
        }
        self
    }

    pub fn with_result(mut self, result: RawStatementResult) -> Self {
        self.result = Ok(result);
        self
    }

    pub fn with_fetch_failure(mut self, message: &str) -> Self {
        self.result = Err(message.to_string());
        self
    }

    /// Cancel `token` right after the `n`-th describe call returns.
    pub fn cancelling_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.submit_calls() + self.describe_calls() + self.fetch_calls() + self.cancel_calls()
    }
}

#[async_trait]
impl WarehouseClient for ScriptedWarehouse {
    async fn submit(&self, sql: &str) -> Result<Option<String>> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(sql.to_string());
        }
        match &self.submit {
            SubmitScript::Id(id) => Ok(Some(id.clone())),
            SubmitScript::NoId => Ok(None),
            SubmitScript::Failure(message) => Err(anyhow!(message.clone())),
        }
    }

    async fn describe(&self, _execution_id: &str) -> Result<StatementDescription> {
        let calls = self.describe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self
            .statuses
            .lock()
            .map_err(|_| anyhow!("status lock poisoned"))?
            .pop_front();
        if let Some((n, token)) = &self.cancel_after
            && calls == *n
        {
            token.cancel();
        }
        match next {
            Some(Ok(description)) => Ok(description),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }

    async fn fetch(&self, _execution_id: &str) -> Result<RawStatementResult> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(|message| anyhow!(message))
    }

    async fn cancel(&self, _execution_id: &str) -> Result<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
