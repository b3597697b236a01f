use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::json_repair::parse_json_lenient;

// ============ Chat Messages ============

/// A single message exchanged with the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Token accounting reported by the gateway per completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ============ Inbound Payload ============

/// One prior conversation turn supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// The caller-facing request payload.
///
/// `injected_parameters` are substituted into cache SQL templates at render
/// time (e.g. `user_id`); they never reach generated SQL directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMessagePayload {
    pub user_message: String,
    #[serde(default)]
    pub chat_history: Vec<Turn>,
    #[serde(default)]
    pub injected_parameters: HashMap<String, Value>,
}

// ============ Query Results ============

/// Tabular result of a single SELECT execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render the result set as a GitHub-flavored markdown table.
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_string();
        }

        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&self.columns.join(" | "));
        out.push_str(" |\n|");
        for _ in &self.columns {
            out.push_str("---|");
        }
        out.push('\n');

        for row in &self.rows {
            out.push_str("| ");
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            out.push_str(&cells.join(" | "));
            out.push_str(" |\n");
        }

        if self.truncated {
            out.push_str("\n_(results truncated)_\n");
        }

        out
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "".to_string(),
        Value::String(s) => s.replace('|', "\\|").replace('\n', " "),
        other => other.to_string(),
    }
}

// ============ Error Taxonomy ============

/// Classification of run failures surfaced to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputRejected,
    SchemaNotFound,
    AmbiguityUnresolved,
    SqlSyntaxError,
    SqlExecutionError,
    ToolTimeout,
    RunTimeout,
    CacheWriteFailure,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable wire code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InputRejected => "input_rejected",
            ErrorKind::SchemaNotFound => "schema_not_found",
            ErrorKind::AmbiguityUnresolved => "ambiguity_unresolved",
            ErrorKind::SqlSyntaxError => "sql_syntax_error",
            ErrorKind::SqlExecutionError => "sql_execution_error",
            ErrorKind::ToolTimeout => "tool_timeout",
            ErrorKind::RunTimeout => "run_timeout",
            ErrorKind::CacheWriteFailure => "cache_write_failure",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a failure of this kind may be retried in place with
    /// unchanged arguments.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::SqlSyntaxError
                | ErrorKind::SqlExecutionError
                | ErrorKind::ToolTimeout
        )
    }
}

// ============ Outbound Payloads ============

/// One clarification question the caller must answer before the run can
/// resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisambiguationQuestion {
    pub text: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// A single supporting source: the SQL that was executed and the rows it
/// produced. `error` is populated when the sub-question failed but the run
/// as a whole still produced an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSource {
    pub sql_query: String,
    pub sql_rows: SqlRows,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rows attached to a source: either pre-rendered markdown or structured
/// rows, per the caller's preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlRows {
    Markdown(String),
    Rows(Vec<Vec<Value>>),
}

/// Streamed payloads emitted while a run progresses. The final element of
/// any stream is one of the terminal variants: `AnswerWithSources`,
/// `Disambiguation`, or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "payload_type", rename_all = "snake_case")]
pub enum OutboundPayload {
    ProcessingUpdate {
        message: String,
    },
    Thought {
        agent: String,
        content: String,
    },
    Disambiguation {
        questions: Vec<DisambiguationQuestion>,
    },
    AnswerWithSources {
        answer: String,
        sources: Vec<AnswerSource>,
        #[serde(skip_serializing_if = "Option::is_none")]
        follow_up_suggestions: Option<Vec<String>>,
    },
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl OutboundPayload {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        OutboundPayload::Error {
            code: kind.code().to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn error_with_details(
        kind: ErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        OutboundPayload::Error {
            code: kind.code().to_string(),
            message: message.into(),
            details: Some(details.into()),
        }
    }

    /// Terminal payloads end the stream; everything else is progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundPayload::Disambiguation { .. }
                | OutboundPayload::AnswerWithSources { .. }
                | OutboundPayload::Error { .. }
        )
    }
}

// ============ Tool Calls ============

/// Parsed tool call from an assistant response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: Value,
    pub raw: String,
}

/// Parse `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` blocks
/// from assistant content. Tolerates malformed JSON via the lenient parser
/// and unclosed trailing blocks where the model forgot `</tool_call>`.
pub fn parse_tool_calls(content: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();

    let re = Regex::new(r"(?s)<tool_call>\s*(.*?)\s*</tool_call>").unwrap();
    for cap in re.captures_iter(content) {
        if let Some(json_match) = cap.get(1) {
            let raw = cap.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            if let Some(call) = tool_call_from_json(json_match.as_str(), raw) {
                calls.push(call);
            }
        }
    }

    if calls.is_empty() {
        // Unclosed trailing block: take everything after the last open tag.
        if let Some(idx) = content.rfind("<tool_call>") {
            let tail = content[idx + "<tool_call>".len()..].trim();
            if tail.starts_with('{') {
                if let Some(call) = tool_call_from_json(tail, content[idx..].to_string()) {
                    calls.push(call);
                }
            }
        }
    }

    calls
}

fn tool_call_from_json(json_str: &str, raw: String) -> Option<ParsedToolCall> {
    let parsed = parse_json_lenient(json_str)?;
    let name = parsed
        .get("name")
        .or_else(|| parsed.get("tool"))
        .and_then(|v| v.as_str())?
        .to_string();
    let arguments = parsed
        .get("arguments")
        .or_else(|| parsed.get("parameters"))
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));
    Some(ParsedToolCall {
        name,
        arguments,
        raw,
    })
}
