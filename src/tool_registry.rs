//! Tool registry: typed schemas for the LLM-invokable tools and the
//! dispatcher that executes parsed tool calls with per-call timeouts and
//! bounded retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::actors::sql_exec_actor::SqlExecMsg;
use crate::catalog::EntityDocument;
use crate::config::TargetEngine;
use crate::protocol::{ParsedToolCall, QueryRows};
use crate::stores::schema_index::SchemaIndex;
use crate::stores::value_index::ValueIndex;
use crate::tools::column_values::{ColumnValuesExecutor, ColumnValuesInput};
use crate::tools::entity_schemas::{EntitySchemasExecutor, EntitySchemasInput};
use crate::tools::execute_sql::{ExecuteSqlExecutor, ExecuteSqlInput};
use crate::tools::validate_sql::{ValidateSqlExecutor, ValidateSqlInput};

/// Retries for transient tool failures (timeouts).
const TOOL_RETRIES: usize = 3;

// ========== Tool Schemas ==========

/// Schema of one tool as shown to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

fn get_entity_schemas_tool() -> ToolSchema {
    ToolSchema {
        name: "get_entity_schemas".to_string(),
        description: "Hybrid search over the schema store. Returns the most relevant \
            entities with their columns, sample values, and relationships."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "search_text": {
                    "type": "string",
                    "description": "Natural language description of the data needed"
                },
                "n": {
                    "type": "integer",
                    "description": "Maximum entities to return (default: 3)"
                },
                "selected_entities": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict the search to these entity names or FQNs"
                }
            },
            "required": ["search_text"]
        }),
    }
}

fn get_column_values_tool() -> ToolSchema {
    ToolSchema {
        name: "get_column_values".to_string(),
        description: "Search the column-value store for the canonical stored form of a \
            free-text filter term (e.g. 'UK' -> 'United Kingdom')."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "search_text": {
                    "type": "string",
                    "description": "The filter term as the user phrased it"
                },
                "n": {
                    "type": "integer",
                    "description": "Maximum values to return (default: 5)"
                }
            },
            "required": ["search_text"]
        }),
    }
}

fn validate_sql_tool() -> ToolSchema {
    ToolSchema {
        name: "validate_sql".to_string(),
        description: "Parse a SQL statement under the target dialect. Rejects anything \
            that is not a single SELECT."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string", "description": "The SQL to validate" }
            },
            "required": ["sql"]
        }),
    }
}

fn execute_sql_tool() -> ToolSchema {
    ToolSchema {
        name: "execute_sql".to_string(),
        description: "Execute a single SELECT against the target database with the \
            configured row cap. Returns columns and rows, or the engine error."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string", "description": "The SELECT to execute" }
            },
            "required": ["sql"]
        }),
    }
}

fn current_datetime_tool() -> ToolSchema {
    ToolSchema {
        name: "current_datetime".to_string(),
        description: "Current date and time as an ISO 8601 string. Stable for the whole run."
            .to_string(),
        parameters: json!({ "type": "object", "properties": {} }),
    }
}

/// All built-in tools, filtered by configuration.
pub fn builtin_tool_schemas(use_column_value_store: bool) -> Vec<ToolSchema> {
    let mut tools = vec![
        get_entity_schemas_tool(),
        validate_sql_tool(),
        execute_sql_tool(),
        current_datetime_tool(),
    ];
    if use_column_value_store {
        tools.insert(1, get_column_values_tool());
    }
    tools
}

/// Render tool schemas into the prompt section models are shown.
pub fn render_tool_instructions(tools: &[ToolSchema]) -> String {
    let mut out = String::from(
        "## Tools\n\nWhen you need a tool, output ONLY:\n\
        <tool_call>{\"name\": \"tool_name\", \"arguments\": {...}}</tool_call>\n\n\
        Available tools:\n",
    );
    for tool in tools {
        out.push_str(&format!("- **{}**: {}\n", tool.name, tool.description));
        if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
            let required: Vec<&str> = tool
                .parameters
                .get("required")
                .and_then(|r| r.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            for (name, prop) in props {
                let prop_type = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");
                let marker = if required.contains(&name.as_str()) {
                    " [required]"
                } else {
                    ""
                };
                out.push_str(&format!("  - `{}` ({}){}\n", name, prop_type, marker));
            }
        }
    }
    out
}

// ========== Dispatch ==========

/// Everything tool execution needs, shared per run.
pub struct ToolContext {
    pub schema_index: Arc<SchemaIndex>,
    pub value_index: Arc<ValueIndex>,
    pub sql_tx: mpsc::Sender<SqlExecMsg>,
    pub engine: TargetEngine,
    pub row_limit: usize,
    pub tool_timeout: Duration,
    pub use_column_value_store: bool,
    /// Captured once at run start; `current_datetime` returns this.
    pub run_started_at: DateTime<Utc>,
}

/// Result of dispatching one tool call. Side data lets the sub-run driver
/// track retrieved schemas and executed queries without re-parsing text.
#[derive(Debug, Default)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
    pub retrieved_entities: Vec<EntityDocument>,
    pub executed: Option<(String, QueryRows)>,
}

impl ToolOutcome {
    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            ..Default::default()
        }
    }
}

/// Execute one parsed tool call with the per-call timeout, retrying
/// timeouts up to `TOOL_RETRIES` times with linear backoff.
pub async fn dispatch_tool_call(call: &ParsedToolCall, ctx: &ToolContext) -> ToolOutcome {
    let mut last_timeout_err = String::new();

    for attempt in 0..TOOL_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            println!(
                "[ToolRegistry] Retrying {} (attempt {}/{})",
                call.name,
                attempt + 1,
                TOOL_RETRIES
            );
        }

        match tokio::time::timeout(ctx.tool_timeout, dispatch_once(call, ctx)).await {
            Ok(outcome) => return outcome,
            Err(_) => {
                last_timeout_err = format!(
                    "Tool '{}' timed out after {}s",
                    call.name,
                    ctx.tool_timeout.as_secs()
                );
            }
        }
    }

    ToolOutcome::error(last_timeout_err)
}

async fn dispatch_once(call: &ParsedToolCall, ctx: &ToolContext) -> ToolOutcome {
    println!("[ToolRegistry] Executing: {}", call.name);

    match call.name.as_str() {
        "get_entity_schemas" => {
            let input: EntitySchemasInput = match serde_json::from_value(call.arguments.clone()) {
                Ok(input) => input,
                Err(e) => return ToolOutcome::error(format!("Invalid arguments: {}", e)),
            };
            let executor = EntitySchemasExecutor::new(ctx.schema_index.clone());
            match executor.execute(input).await {
                Ok((text, entities)) => ToolOutcome {
                    text,
                    is_error: false,
                    retrieved_entities: entities,
                    executed: None,
                },
                Err(e) => ToolOutcome::error(e),
            }
        }

        "get_column_values" => {
            if !ctx.use_column_value_store {
                return ToolOutcome::error("The column-value store is disabled");
            }
            let input: ColumnValuesInput = match serde_json::from_value(call.arguments.clone()) {
                Ok(input) => input,
                Err(e) => return ToolOutcome::error(format!("Invalid arguments: {}", e)),
            };
            let executor = ColumnValuesExecutor::new(ctx.value_index.clone());
            match executor.execute(input).await {
                Ok(text) => ToolOutcome {
                    text,
                    ..Default::default()
                },
                Err(e) => ToolOutcome::error(e),
            }
        }

        "validate_sql" => {
            let input: ValidateSqlInput = match serde_json::from_value(call.arguments.clone()) {
                Ok(input) => input,
                Err(e) => return ToolOutcome::error(format!("Invalid arguments: {}", e)),
            };
            let executor = ValidateSqlExecutor::new(ctx.engine);
            match executor.execute(input) {
                Ok(report) => ToolOutcome {
                    is_error: !report.ok,
                    text: serde_json::to_string(&report).unwrap_or_default(),
                    ..Default::default()
                },
                Err(e) => ToolOutcome::error(e),
            }
        }

        "execute_sql" => {
            let input: ExecuteSqlInput = match serde_json::from_value(call.arguments.clone()) {
                Ok(input) => input,
                Err(e) => return ToolOutcome::error(format!("Invalid arguments: {}", e)),
            };
            let executor =
                ExecuteSqlExecutor::new(ctx.sql_tx.clone(), ctx.engine, ctx.row_limit);
            match executor.execute(input).await {
                Ok((output, rows)) => ToolOutcome {
                    is_error: !output.success,
                    executed: rows.map(|r| (output.sql_executed.clone(), r)),
                    text: serde_json::to_string(&output).unwrap_or_default(),
                    retrieved_entities: Vec::new(),
                },
                Err(e) => ToolOutcome::error(e),
            }
        }

        "current_datetime" => ToolOutcome {
            text: ctx.run_started_at.to_rfc3339(),
            ..Default::default()
        },

        other => ToolOutcome::error(format!("Unknown tool: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::sql_exec_actor::SqlExecActor;
    use crate::config::ConnectionConfig;
    use crate::embeddings::empty_embedder;
    use rusqlite::Connection;
    use std::collections::HashSet;

    async fn test_context(dir: &tempfile::TempDir) -> ToolContext {
        let db_path = dir.path().join("t.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE orders (id INTEGER)", []).unwrap();
            conn.execute("INSERT INTO orders VALUES (1), (2)", []).unwrap();
        }
        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());

        ToolContext {
            schema_index: Arc::new(
                SchemaIndex::build(vec![], empty_embedder(), &HashSet::new()).await,
            ),
            value_index: Arc::new(ValueIndex::build(vec![], empty_embedder()).await),
            sql_tx: tx,
            engine: TargetEngine::Sqlite,
            row_limit: 100,
            tool_timeout: Duration::from_secs(5),
            use_column_value_store: true,
            run_started_at: Utc::now(),
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ParsedToolCall {
        ParsedToolCall {
            name: name.to_string(),
            arguments,
            raw: String::new(),
        }
    }

    #[test]
    fn test_builtin_schemas_respect_value_store_flag() {
        let with = builtin_tool_schemas(true);
        assert!(with.iter().any(|t| t.name == "get_column_values"));
        let without = builtin_tool_schemas(false);
        assert!(!without.iter().any(|t| t.name == "get_column_values"));
        assert!(without.iter().any(|t| t.name == "execute_sql"));
    }

    #[test]
    fn test_render_tool_instructions_lists_parameters() {
        let rendered = render_tool_instructions(&builtin_tool_schemas(true));
        assert!(rendered.contains("get_entity_schemas"));
        assert!(rendered.contains("`search_text` (string) [required]"));
        assert!(rendered.contains("<tool_call>"));
    }

    #[tokio::test]
    async fn test_dispatch_execute_sql_returns_rows() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir).await;
        let outcome = dispatch_tool_call(
            &call("execute_sql", json!({"sql": "SELECT id FROM orders"})),
            &ctx,
        )
        .await;
        assert!(!outcome.is_error);
        let (sql, rows) = outcome.executed.unwrap();
        assert!(sql.contains("SELECT id"));
        assert_eq!(rows.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir).await;
        let outcome = dispatch_tool_call(&call("launch_rockets", json!({})), &ctx).await;
        assert!(outcome.is_error);
        assert!(outcome.text.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_dispatch_current_datetime_is_run_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir).await;
        let first = dispatch_tool_call(&call("current_datetime", json!({})), &ctx).await;
        let second = dispatch_tool_call(&call("current_datetime", json!({})), &ctx).await;
        assert_eq!(first.text, second.text);
    }

    #[tokio::test]
    async fn test_dispatch_value_store_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(&dir).await;
        ctx.use_column_value_store = false;
        let outcome = dispatch_tool_call(
            &call("get_column_values", json!({"search_text": "uk"})),
            &ctx,
        )
        .await;
        assert!(outcome.is_error);
    }
}
