//! The LLM-backed agents and their shared tool-call loop.
//!
//! Every agent follows the same shape: build a prompt, call the model
//! gateway, and either parse a final JSON reply or execute requested tool
//! calls and loop. Agents return structured outcomes; the sub-run driver
//! owns the thread and appends the messages.

pub mod answer;
pub mod correction;
pub mod disambiguation;
pub mod generation;
pub mod query_rewrite;
pub mod schema_selection;

use tokio::sync::mpsc;

use crate::actors::model_gateway_actor::{complete, CompletionRequest, GatewayMsg};
use crate::catalog::EntityDocument;
use crate::config::Text2SqlConfig;
use crate::protocol::{parse_tool_calls, ChatMessage, QueryRows, TokenUsage};
use crate::tool_registry::{dispatch_tool_call, ToolContext};

/// Iteration cap for one agent's model/tool loop; the run-level message
/// budget is the outer guard.
const MAX_TOOL_ITERATIONS: usize = 8;

/// Shared dependencies handed to every agent invocation.
pub struct AgentContext<'a> {
    pub gateway_tx: &'a mpsc::Sender<GatewayMsg>,
    pub tools: &'a ToolContext,
    pub config: &'a Text2SqlConfig,
}

/// Result of a model/tool loop: the model's final text plus everything the
/// tools produced along the way.
#[derive(Debug, Default)]
pub struct ToolLoopResult {
    pub final_text: String,
    pub usage: TokenUsage,
    pub retrieved_entities: Vec<EntityDocument>,
    pub executed: Vec<(String, QueryRows)>,
    pub iterations: usize,
}

/// Run the uniform model/tool loop: call the model, execute any tool calls
/// it requests, feed results back, and stop at the first reply with no
/// tool calls.
pub async fn run_tool_loop(
    ctx: &AgentContext<'_>,
    mut messages: Vec<ChatMessage>,
) -> Result<ToolLoopResult, String> {
    let mut result = ToolLoopResult::default();

    for iteration in 0..MAX_TOOL_ITERATIONS {
        result.iterations = iteration + 1;

        let response = complete(ctx.gateway_tx, CompletionRequest::new(messages.clone())).await?;
        if let Some(usage) = response.usage {
            result.usage.prompt_tokens += usage.prompt_tokens;
            result.usage.completion_tokens += usage.completion_tokens;
        }

        let calls = parse_tool_calls(&response.content);
        if calls.is_empty() {
            result.final_text = response.content;
            return Ok(result);
        }

        messages.push(ChatMessage::assistant(response.content.clone()));

        for call in &calls {
            let outcome = dispatch_tool_call(call, ctx.tools).await;
            result
                .retrieved_entities
                .extend(outcome.retrieved_entities);
            if let Some(executed) = outcome.executed {
                result.executed.push(executed);
            }
            let status = if outcome.is_error { "error" } else { "ok" };
            messages.push(ChatMessage::user(format!(
                "<tool_result name=\"{}\" status=\"{}\">\n{}\n</tool_result>",
                call.name, status, outcome.text
            )));
        }
    }

    Err(format!(
        "Agent exceeded {} tool iterations without a final reply",
        MAX_TOOL_ITERATIONS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::sql_exec_actor::SqlExecActor;
    use crate::config::{ConnectionConfig, TargetEngine};
    use crate::embeddings::empty_embedder;
    use crate::stores::schema_index::SchemaIndex;
    use crate::stores::value_index::ValueIndex;
    use crate::tests::harness::spawn_scripted_gateway;
    use chrono::Utc;
    use rusqlite::Connection;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    async fn tool_context(dir: &tempfile::TempDir) -> ToolContext {
        let db_path = dir.path().join("t.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE orders (id INTEGER)", []).unwrap();
            conn.execute("INSERT INTO orders VALUES (7)", []).unwrap();
        }
        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = tokio::sync::mpsc::channel(8);
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

    #[tokio::test]
    async fn test_loop_executes_tool_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tool_context(&dir).await;
        let gateway_tx = spawn_scripted_gateway(|req| {
            let saw_tool_result = req
                .messages
                .iter()
                .any(|m| m.content.contains("<tool_result"));
            if saw_tool_result {
                r#"{"sql": "SELECT id FROM orders"}"#.to_string()
            } else {
                "<tool_call>{\"name\": \"execute_sql\", \"arguments\": {\"sql\": \"SELECT id FROM orders\"}}</tool_call>".to_string()
            }
        });
        let config = Text2SqlConfig::default();
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let result = run_tool_loop(&ctx, vec![ChatMessage::user("run it")])
            .await
            .unwrap();
        assert_eq!(result.iterations, 2);
        assert_eq!(result.executed.len(), 1);
        assert!(result.final_text.contains("SELECT id"));
        assert!(result.usage.total() > 0);
    }

    #[tokio::test]
    async fn test_loop_bails_after_iteration_cap() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tool_context(&dir).await;
        let gateway_tx = spawn_scripted_gateway(|_| {
            "<tool_call>{\"name\": \"current_datetime\", \"arguments\": {}}</tool_call>"
                .to_string()
        });
        let config = Text2SqlConfig::default();
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let err = run_tool_loop(&ctx, vec![ChatMessage::user("loop forever")])
            .await
            .unwrap_err();
        assert!(err.contains("iterations"));
    }
}
