//! Prompt text for every model call the engine makes.
//!
//! History is always rendered as `role: content` lines in insertion order.
//! The schema document is embedded as pretty JSON.

use serde::Serialize;

use crate::core::insight::InsightStyle;
use crate::core::types::{CellValue, ColumnMetadata, ConversationTurn, ResultSet, SchemaMetadata};

/// Upper bound on history turns embedded into the classifier prompt.
pub const MAX_CLASSIFIER_TURNS: usize = 20;

pub fn format_history(history: &[ConversationTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_classifier_prompt(message: &str, history: &[ConversationTurn]) -> String {
    let recent = &history[history.len().saturating_sub(MAX_CLASSIFIER_TURNS)..];
    format!(
        "Given the following chat history and the latest user message, determine if the user's request requires:\n\
         1. SQL query generation and execution (return \"ql\") - the user asks for specific data or metrics, \
            such as \"what is the average temperature in the last 30 days\"\n\
         2. SQL query text only (return \"redshift\") - the user asks to write or show a query without running it, \
            such as \"generate a query with the last 10 rows of scada\"\n\
         3. General chat/analysis (return \"chat\") - the user wants a summary, analysis, or general conversation\n\
         4. Missing information (return \"missing\") - the chat history and the latest message lack information \
            needed to answer well, such as a metric that was never defined\n\n\
         Chat history:\n{history}\n\n\
         Latest user message: \"{message}\"\n\n\
         Return only one word: \"ql\", \"redshift\", \"chat\" or \"missing\", without any explanation.",
        history = format_history(recent),
        message = message,
    )
}

pub fn build_sql_prompt(
    message: &str,
    schema: &SchemaMetadata,
    history: Option<&[ConversationTurn]>,
) -> String {
    let mut parts = Vec::new();
    if let Some(history) = history {
        parts.push(format!(
            "Given this conversation history:\n{}\n",
            format_history(history)
        ));
    }
    parts.push(format!(
        "Based on the following database schema:\n{}\n",
        schema.to_prompt_text()
    ));
    parts.push(format!(
        "Generate a Redshift SQL query for this question: \"{}\"\n\
         Return only the SQL query without any explanation or additional text. \
         Qualify every table with its schema name.",
        message
    ));
    parts.join("\n")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultPreview<'a> {
    column_metadata: &'a [ColumnMetadata],
    records: &'a [Vec<CellValue>],
    total_num_rows: u64,
}

/// Serialize at most `max_rows` records of `result`. Returns the JSON text and
/// a note describing the truncation when rows were left out.
pub fn render_result_preview(result: &ResultSet, max_rows: usize) -> (String, Option<String>) {
    let shown = result.records.len().min(max_rows);
    let total = result.total_num_rows.max(result.records.len() as u64);
    let preview = ResultPreview {
        column_metadata: &result.column_metadata,
        records: &result.records[..shown],
        total_num_rows: total,
    };
    let json = serde_json::to_string_pretty(&preview).unwrap_or_default();
    let note = if (shown as u64) < total {
        Some(format!(
            "Note: showing {} of {} rows; the remaining rows were omitted from this prompt.",
            shown, total
        ))
    } else {
        None
    };
    (json, note)
}

pub fn build_insight_prompt(
    result: &ResultSet,
    question: &str,
    history: &[ConversationTurn],
    max_rows: usize,
    style: InsightStyle,
) -> String {
    let (results_json, truncation) = render_result_preview(result, max_rows);
    let mut parts = vec![format!(
        "Given this conversation history:\n{}\n",
        format_history(history)
    )];

    match style {
        InsightStyle::Narrative => {
            parts.push(format!(
                "Analyze the following SQL query results and provide insights.\n\n\
                 Original question: {}\n\nResults:\n{}",
                question, results_json
            ));
            if let Some(note) = truncation {
                parts.push(note);
            }
            parts.push(
                "Please provide:\n\
                 1. A brief summary of the data\n\
                 2. Key patterns or trends\n\
                 3. Notable outliers or anomalies\n\
                 4. Business implications or recommendations\n\n\
                 Format the response in a clear, structured way."
                    .to_string(),
            );
        }
        InsightStyle::Answer => {
            parts.push(format!(
                "Answer the question with the following SQL query results.\n\n\
                 Original question: {}\n\nResults:\n{}",
                question, results_json
            ));
            if let Some(note) = truncation {
                parts.push(note);
            }
            parts.push("Format the response in a clear way.".to_string());
        }
    }
    parts.join("\n\n")
}

pub fn build_chat_prompt(message: &str, history: &[ConversationTurn]) -> String {
    format!(
        "Given this conversation context:\n{}\n\nRespond to: \"{}\"",
        format_history(history),
        message
    )
}

pub fn build_clarification_prompt(
    message: &str,
    schema: &SchemaMetadata,
    history: &[ConversationTurn],
) -> String {
    format!(
        "Given this conversation history:\n{history}\n\n\
         And this database schema:\n{schema}\n\n\
         For the latest user message: \"{message}\"\n\n\
         1. Identify what information is missing to properly handle this request\n\
         2. Suggest 1-2 follow-up questions to get the missing information\n\
         3. Format the response as JSON with fields:\n\
            - missingInfo: what's missing\n\
            - questions: array of follow-up questions\n\n\
         Return only the JSON.",
        history = format_history(history),
        schema = schema.to_prompt_text(),
        message = message,
    )
}
