pub mod anthropic;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use anthropic::AnthropicProvider;

/// One event of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// Any other event kind (message_start, ping, ...). Ignored when collecting.
    Other(String),
    Stop,
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Model and output budget for one kind of call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(settings: &ModelSettings, prompt: String) -> Self {
        Self {
            model: settings.model.clone(),
            prompt,
            max_tokens: settings.max_tokens,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Open a streamed completion for a single user prompt.
    async fn stream(&self, request: ModelRequest) -> Result<TextStream>;
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("model call failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("model stream contained no text")]
    NoText,

    #[error("model call cancelled")]
    Cancelled,
}

/// Drain `stream` in arrival order and return the trimmed concatenation of
/// its text deltas. Nothing is returned until the stream has ended.
pub async fn collect_text(
    mut stream: TextStream,
    cancel: &CancellationToken,
) -> Result<String, StreamError> {
    let mut text = String::new();
    let mut saw_text = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            item = stream.next() => item,
        };
        match next {
            None | Some(Ok(StreamEvent::Stop)) => break,
            Some(Ok(StreamEvent::TextDelta(delta))) => {
                saw_text = true;
                text.push_str(&delta);
            }
            Some(Ok(StreamEvent::Other(kind))) => debug!("Skipping model stream event: {}", kind),
            Some(Err(e)) => return Err(StreamError::Transport(e)),
        }
    }

    if !saw_text {
        return Err(StreamError::NoText);
    }
    Ok(text.trim().to_string())
}

/// Open a stream for `request` and collect it. Cancellation is checked
/// before the call is made and while it is in flight.
pub async fn complete(
    llm: &Arc<dyn LlmProvider>,
    request: ModelRequest,
    cancel: &CancellationToken,
) -> Result<String, StreamError> {
    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }
    debug!(
        "Invoking {} model {} (max_tokens={}, prompt_chars={})",
        llm.provider_id(),
        request.model,
        request.max_tokens,
        request.prompt.len()
    );
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        res = llm.stream(request) => res.map_err(StreamError::Transport)?,
    };
    collect_text(stream, cancel).await
}
