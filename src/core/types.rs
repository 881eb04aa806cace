use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the caller-owned conversation history. The engine only ever
/// reads history through `&[ConversationTurn]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Opaque warehouse schema document. Loaded once by the caller and shared by
/// reference into every prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMetadata(Arc<serde_json::Value>);

impl SchemaMetadata {
    pub fn new(document: serde_json::Value) -> Self {
        Self(Arc::new(document))
    }

    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw).map(Self::new)
    }

    pub fn document(&self) -> &serde_json::Value {
        &self.0
    }

    /// Pretty JSON used when embedding the schema into a prompt.
    pub fn to_prompt_text(&self) -> String {
        serde_json::to_string_pretty(self.0.as_ref()).unwrap_or_else(|_| self.0.to_string())
    }
}

/// SQL produced for exactly one request. There is no way to change the text
/// after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedQuery {
    request_id: Uuid,
    sql: String,
}

impl GeneratedQuery {
    pub fn new(request_id: Uuid, sql: impl Into<String>) -> Self {
        Self {
            request_id,
            sql: sql.into(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for GeneratedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A single cell after unwrapping the provider's typed-value envelope.
/// Values keep their native type; formatting is left to presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Long(v) => write!(f, "{}", v),
            CellValue::Double(v) => write!(f, "{}", v),
            CellValue::String(v) => f.write_str(v),
            CellValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub column_metadata: Vec<ColumnMetadata>,
    pub records: Vec<Vec<CellValue>>,
    pub total_num_rows: u64,
}

impl ResultSet {
    /// The shape reported for statements that finish without a result set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.records.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Narrative text synthesized from a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Insight(pub String);

impl Insight {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Insight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    GenerationError,
    ExecutionError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::GenerationError => "generation_error",
            ErrorType::ExecutionError => "execution_error",
        }
    }
}

/// Result of one pipeline run. Execution-phase failures keep the SQL that
/// was generated so it can be inspected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Success {
        query: String,
        result: ResultSet,
        insights: Insight,
    },
    Error {
        error: String,
        #[serde(rename = "errorType")]
        error_type: ErrorType,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<String>,
    },
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success { .. })
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            Envelope::Success { .. } => None,
            Envelope::Error { error_type, .. } => Some(*error_type),
        }
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            Envelope::Success { query, .. } => Some(query),
            Envelope::Error { query, .. } => query.as_deref(),
        }
    }
}
