use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;

use super::{LlmProvider, ModelRequest, StreamEvent, TextStream};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<MessagesEntry<'a>>,
}

#[derive(Serialize)]
struct MessagesEntry<'a> {
    role: &'a str,
    content: &'a str,
}

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, request: ModelRequest) -> Result<TextStream> {
        let req = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            stream: true,
            messages: vec![MessagesEntry {
                role: "user",
                content: &request.prompt,
            }],
        };

        let res = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!(
                "Anthropic API Error ({}): {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }

        // Read the SSE body line-by-line
        let reader = StreamReader::new(
            res.bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(BufReader::new(reader).lines());
        let events = lines.filter_map(|line| match line {
            Ok(line) => parse_sse_line(&line).transpose(),
            Err(e) => Some(Err(anyhow!("Anthropic stream read failed: {}", e))),
        });
        Ok(Box::pin(events))
    }
}

/// Map one SSE line to a stream event. `event:` lines, comments and blank
/// keep-alive lines carry nothing the `data:` payload doesn't already name.
pub(crate) fn parse_sse_line(line: &str) -> Result<Option<StreamEvent>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let json: Value = serde_json::from_str(data)?;
    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let event = match event_type {
        "content_block_delta" => {
            let delta = json.get("delta");
            let is_text = delta
                .and_then(|d| d.get("type"))
                .and_then(|v| v.as_str())
                == Some("text_delta");
            match delta.and_then(|d| d.get("text")).and_then(|v| v.as_str()) {
                Some(text) if is_text => StreamEvent::TextDelta(text.to_string()),
                _ => StreamEvent::Other("content_block_delta".to_string()),
            }
        }
        "message_stop" => StreamEvent::Stop,
        "error" => {
            let message = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(anyhow!("Anthropic stream error: {}", message));
        }
        other => StreamEvent::Other(other.to_string()),
    };
    Ok(Some(event))
}
