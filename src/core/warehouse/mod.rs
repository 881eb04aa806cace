//! Warehouse client seam. Field names follow the Redshift Data API so a
//! statement description or result page can be deserialized as received.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpWarehouseClient;

/// The warehouse answered, but its payload did not decode into the expected shape.
#[derive(Debug, Error)]
#[error("Warehouse {action} returned malformed JSON")]
pub struct MalformedPayload {
    pub action: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatementDescription {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub has_result_set: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatementDescription {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawColumn {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub type_name: Option<String>,
}

/// Typed-value envelope of a single cell. At most one field is populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Base64 encoded bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_value: Option<String>,
}

impl RawField {
    pub fn null() -> Self {
        Self {
            is_null: Some(true),
            ..Self::default()
        }
    }

    pub fn long(v: i64) -> Self {
        Self {
            long_value: Some(v),
            ..Self::default()
        }
    }

    pub fn double(v: f64) -> Self {
        Self {
            double_value: Some(v),
            ..Self::default()
        }
    }

    pub fn string(v: &str) -> Self {
        Self {
            string_value: Some(v.to_string()),
            ..Self::default()
        }
    }

    pub fn boolean(v: bool) -> Self {
        Self {
            boolean_value: Some(v),
            ..Self::default()
        }
    }
}

/// One result page as returned by the provider. Every array may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawStatementResult {
    #[serde(default)]
    pub column_metadata: Option<Vec<RawColumn>>,
    #[serde(default)]
    pub records: Option<Vec<Vec<Option<RawField>>>>,
    #[serde(default)]
    pub total_num_rows: Option<i64>,
}

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Submit `sql` for asynchronous execution. `None` means the provider
    /// accepted the call but assigned no statement id.
    async fn submit(&self, sql: &str) -> Result<Option<String>>;

    async fn describe(&self, execution_id: &str) -> Result<StatementDescription>;

    /// Fetch the full result of a finished statement in one page.
    async fn fetch(&self, execution_id: &str) -> Result<RawStatementResult>;

    async fn cancel(&self, execution_id: &str) -> Result<()>;
}
