use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::execution::PollPolicy;
use crate::core::insight::{DEFAULT_MAX_ROWS, InsightStyle};
use crate::core::llm::ModelSettings;

pub const CONFIG_FILE_NAME: &str = "querybrain.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// JSON document describing the warehouse schemas, tables and columns.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub insights: InsightsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_classifier_max_tokens")]
    pub classifier_max_tokens: u32,
    #[serde(default = "default_sql_max_tokens")]
    pub sql_max_tokens: u32,
    #[serde(default = "default_long_max_tokens")]
    pub insight_max_tokens: u32,
    #[serde(default = "default_long_max_tokens")]
    pub chat_max_tokens: u32,
    #[serde(default = "default_sql_max_tokens")]
    pub clarification_max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub workgroup: Option<String>,
    #[serde(default)]
    pub secret_arn: Option<String>,
    /// Bearer token presented to the endpoint.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default)]
    pub style: InsightStyle,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    /// Overall budget for one request. Unbounded when absent.
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20240620".to_string()
}
fn default_classifier_max_tokens() -> u32 {
    10
}
fn default_sql_max_tokens() -> u32 {
    1000
}
fn default_long_max_tokens() -> u32 {
    2000
}
fn default_endpoint() -> String {
    "http://127.0.0.1:8099".to_string()
}
fn default_database() -> String {
    "dev".to_string()
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_max_poll_attempts() -> u32 {
    60
}
fn default_max_rows() -> usize {
    DEFAULT_MAX_ROWS
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            classifier_max_tokens: default_classifier_max_tokens(),
            sql_max_tokens: default_sql_max_tokens(),
            insight_max_tokens: default_long_max_tokens(),
            chat_max_tokens: default_long_max_tokens(),
            clarification_max_tokens: default_sql_max_tokens(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            database: default_database(),
            workgroup: None,
            secret_arn: None,
            token: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            style: InsightStyle::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LlmConfig {
    fn settings(&self, max_tokens: u32) -> ModelSettings {
        ModelSettings {
            model: self.model.clone(),
            max_tokens,
        }
    }

    pub fn classifier_settings(&self) -> ModelSettings {
        self.settings(self.classifier_max_tokens)
    }

    pub fn sql_settings(&self) -> ModelSettings {
        self.settings(self.sql_max_tokens)
    }

    pub fn insight_settings(&self) -> ModelSettings {
        self.settings(self.insight_max_tokens)
    }

    pub fn chat_settings(&self) -> ModelSettings {
        self.settings(self.chat_max_tokens)
    }

    pub fn clarification_settings(&self) -> ModelSettings {
        self.settings(self.clarification_max_tokens)
    }
}

impl WarehouseConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts,
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// `<config dir>/querybrain/querybrain.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("querybrain").join(CONFIG_FILE_NAME))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found at {}, using defaults.", CONFIG_FILE_NAME, path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: AppConfig = toml::from_str(&content)?;

        // Relative schema paths are resolved against the config file's directory.
        if let Some(schema) = &config.schema_path
            && schema.is_relative()
            && let Some(parent) = path.parent()
        {
            config.schema_path = Some(parent.join(schema));
        }

        info!(
            "Loaded config from {}: model={}, database={}, poll={}ms x{}",
            path.display(),
            config.llm.model,
            config.warehouse.database,
            config.warehouse.poll_interval_ms,
            config.warehouse.max_poll_attempts
        );
        Ok(config)
    }

    /// Apply `QUERYBRAIN_*` and `ANTHROPIC_API_KEY` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = get("QUERYBRAIN_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = get("QUERYBRAIN_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = get("QUERYBRAIN_WAREHOUSE_ENDPOINT") {
            self.warehouse.endpoint = endpoint;
        }
        if let Some(database) = get("QUERYBRAIN_WAREHOUSE_DATABASE") {
            self.warehouse.database = database;
        }
        if let Some(workgroup) = get("QUERYBRAIN_WAREHOUSE_WORKGROUP") {
            self.warehouse.workgroup = Some(workgroup);
        }
        if let Some(arn) = get("QUERYBRAIN_WAREHOUSE_SECRET_ARN") {
            self.warehouse.secret_arn = Some(arn);
        }
        if let Some(token) = get("QUERYBRAIN_WAREHOUSE_TOKEN") {
            self.warehouse.token = Some(token);
        }
        if let Some(schema) = get("QUERYBRAIN_SCHEMA") {
            self.schema_path = Some(PathBuf::from(schema));
        }
        if let Some(level) = get("QUERYBRAIN_LOG") {
            self.logging.level = level;
        }
        if let Some(port) = get("QUERYBRAIN_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.warehouse.max_poll_attempts == 0 {
            bail!("warehouse.max_poll_attempts must be at least 1");
        }
        if self.warehouse.database.trim().is_empty() {
            bail!("warehouse.database must not be empty");
        }
        if self.insights.max_rows == 0 {
            bail!("insights.max_rows must be at least 1");
        }
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.pipeline.deadline_secs == Some(0) {
            bail!("pipeline.deadline_secs must be positive when set");
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
