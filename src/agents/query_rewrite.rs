//! Query rewrite agent: resolves relative dates, filters off-topic
//! requests, and decomposes the user message into rounds of independent
//! sub-questions.
//!
//! Invoked exactly once per run.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actors::model_gateway_actor::{complete, CompletionRequest};
use crate::agents::AgentContext;
use crate::json_repair::parse_json_lenient;
use crate::prompts::render_prompt;
use crate::protocol::{ChatMessage, TokenUsage, Turn};

/// The rewrite agent's JSON contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRewriteResponse {
    #[serde(default)]
    pub decomposed_user_messages: Vec<Vec<String>>,
    #[serde(default)]
    pub combination_logic: String,
    #[serde(default)]
    pub all_non_database_query: bool,
    #[serde(default)]
    pub non_database_response: Option<String>,
}

impl QueryRewriteResponse {
    /// Empty decompositions short-circuit the run just like explicit
    /// non-database classifications.
    pub fn is_non_database(&self) -> bool {
        self.all_non_database_query
            || self
                .decomposed_user_messages
                .iter()
                .all(|round| round.is_empty())
    }
}

/// Run the rewrite agent over the full chat history plus the new message.
pub async fn run(
    ctx: &AgentContext<'_>,
    chat_history: &[Turn],
    user_message: &str,
) -> Result<(QueryRewriteResponse, Option<TokenUsage>), String> {
    let system_prompt = render_prompt(
        "query_rewrite",
        json!({
            "use_case": ctx.config.use_case,
            "target_engine": ctx.config.target_engine.display_name(),
            "current_datetime": ctx.tools.run_started_at.to_rfc3339(),
        }),
    )?;

    let mut messages = vec![ChatMessage::system(system_prompt)];
    for turn in chat_history {
        messages.push(ChatMessage {
            role: turn.role.clone(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage::user(user_message));

    let response = complete(ctx.gateway_tx, CompletionRequest::new(messages)).await?;

    let parsed = match parse_json_lenient(&response.content) {
        Some(value) => serde_json::from_value::<QueryRewriteResponse>(value).ok(),
        None => None,
    };

    let rewrite = parsed.unwrap_or_else(|| {
        // A reply that never produced the contract JSON is treated as a
        // conversational response rather than failing the run.
        println!("[QueryRewrite] Non-JSON reply, treating as conversational");
        QueryRewriteResponse {
            decomposed_user_messages: vec![],
            combination_logic: String::new(),
            all_non_database_query: true,
            non_database_response: Some(response.content.clone()),
        }
    });

    Ok((rewrite, response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::harness::{agent_fixtures, spawn_scripted_gateway};

    #[tokio::test]
    async fn test_decomposition_parsed() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|_| {
            r#"{"decomposed_user_messages": [["total revenue for 2024", "marketing headcount"]],
                "combination_logic": "independent answers", "all_non_database_query": false}"#
                .to_string()
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let (rewrite, usage) = run(&ctx, &[], "revenue and headcount please")
            .await
            .unwrap();
        assert!(!rewrite.is_non_database());
        assert_eq!(rewrite.decomposed_user_messages[0].len(), 2);
        assert!(usage.is_some());
    }

    #[tokio::test]
    async fn test_non_json_reply_becomes_conversational() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx =
            spawn_scripted_gateway(|_| "Hello! I can answer questions about sales.".to_string());
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let (rewrite, _) = run(&ctx, &[], "hi there").await.unwrap();
        assert!(rewrite.is_non_database());
        assert!(rewrite
            .non_database_response
            .as_deref()
            .unwrap()
            .contains("Hello"));
    }

    #[tokio::test]
    async fn test_history_is_forwarded() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|req| {
            assert!(req
                .messages
                .iter()
                .any(|m| m.role == "assistant" && m.content.contains("42 orders")));
            r#"{"decomposed_user_messages": [["orders in 2009"]], "combination_logic": "",
                "all_non_database_query": false}"#
                .to_string()
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let history = vec![
            Turn {
                role: "user".to_string(),
                content: "orders in 2008?".to_string(),
            },
            Turn {
                role: "assistant".to_string(),
                content: "There were 42 orders.".to_string(),
            },
        ];
        let (rewrite, _) = run(&ctx, &history, "and the year after?").await.unwrap();
        assert_eq!(rewrite.decomposed_user_messages[0][0], "orders in 2009");
    }
}
