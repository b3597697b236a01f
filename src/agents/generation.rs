//! SQL generation agent: produces exactly one SELECT statement for a
//! sub-question, using the retrieval tools for missing schema context and
//! the validator before handing off.

use regex::Regex;
use serde_json::json;

use crate::agents::{run_tool_loop, AgentContext, ToolLoopResult};
use crate::catalog::EntityDocument;
use crate::json_repair::parse_json_lenient;
use crate::prompts::{engine_rules, render_prompt};
use crate::protocol::{ChatMessage, TokenUsage};
use crate::sql_validation::validate_select;
use crate::tool_registry::{builtin_tool_schemas, render_tool_instructions};

/// Everything the generation agent needs about one sub-question.
#[derive(Debug, Default)]
pub struct GenerationRequest<'a> {
    pub sub_question: &'a str,
    pub schemas: &'a [EntityDocument],
    /// Mapping JSON from a clear disambiguation pass.
    pub mapping: Option<&'a str>,
    /// The caller's clarification reply, when resuming.
    pub clarification: Option<&'a str>,
    /// Rendered `(sql, rows)` results from earlier rounds.
    pub prior_results: Option<&'a str>,
    /// Cached SQL to adapt, on a cache hit without pre-run rows.
    pub cached_sql: Option<&'a str>,
}

/// Outcome of the generation agent.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub sql: Option<String>,
    pub error: Option<String>,
    pub retrieved_entities: Vec<EntityDocument>,
    pub usage: TokenUsage,
}

/// Run the generation agent, self-correcting parse failures up to the
/// configured retry budget before handing the error to correction.
pub async fn run(
    ctx: &AgentContext<'_>,
    request: GenerationRequest<'_>,
) -> Result<GenerationOutcome, String> {
    // Generation may look up more schemas and validate, but never executes.
    let tools: Vec<_> = builtin_tool_schemas(ctx.config.use_column_value_store)
        .into_iter()
        .filter(|t| t.name != "execute_sql")
        .collect();

    let rendered_schemas: Vec<String> =
        request.schemas.iter().map(|e| e.render_for_prompt()).collect();

    let system_prompt = render_prompt(
        "sql_generation",
        json!({
            "use_case": ctx.config.use_case,
            "target_engine": ctx.config.target_engine.display_name(),
            "current_datetime": ctx.tools.run_started_at.to_rfc3339(),
            "row_limit": ctx.config.row_limit,
            "engine_rules": engine_rules(ctx.config.target_engine),
            "engine_specific_rules": ctx.config.engine_specific_rules,
            "use_column_value_store": ctx.config.use_column_value_store,
            "tool_instructions": render_tool_instructions(&tools),
            "schemas": rendered_schemas.join("\n"),
            "prior_results": request.prior_results.unwrap_or(""),
            "question": request.sub_question,
        }),
    )?;

    let mut user_content = String::new();
    if let Some(mapping) = request.mapping {
        if !mapping.is_empty() {
            user_content.push_str(&format!("Resolved column mappings:\n{}\n\n", mapping));
        }
    }
    if let Some(clarification) = request.clarification {
        user_content.push_str(&format!("The user clarified: {}\n\n", clarification));
    }
    if let Some(cached_sql) = request.cached_sql {
        user_content.push_str(&format!(
            "A similar cached question used this SQL; adapt it if it fits:\n{}\n\n",
            cached_sql
        ));
    }
    user_content.push_str(request.sub_question);

    let mut messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_content),
    ];

    let mut retrieved_entities = Vec::new();
    let mut usage = TokenUsage::default();
    let mut last_error = String::new();

    for attempt in 0..=ctx.config.generation_validation_retries {
        let ToolLoopResult {
            final_text,
            usage: loop_usage,
            retrieved_entities: loop_entities,
            ..
        } = run_tool_loop(ctx, messages.clone()).await?;

        usage.prompt_tokens += loop_usage.prompt_tokens;
        usage.completion_tokens += loop_usage.completion_tokens;
        retrieved_entities.extend(loop_entities);

        let Some(sql) = extract_sql(&final_text) else {
            last_error = "No SQL statement found in the reply".to_string();
            messages.push(ChatMessage::assistant(final_text));
            messages.push(ChatMessage::user(
                "Your reply contained no SQL. Respond with ONLY {\"sql\": \"<SELECT ...>\"}."
                    .to_string(),
            ));
            continue;
        };

        let report = validate_select(&sql, ctx.config.target_engine);
        if report.ok {
            println!(
                "[SqlGeneration] Validated SQL on attempt {}: {}",
                attempt + 1,
                sql.split_whitespace().take(8).collect::<Vec<_>>().join(" ")
            );
            return Ok(GenerationOutcome {
                sql: Some(sql),
                error: None,
                retrieved_entities,
                usage,
            });
        }

        last_error = report.errors.join("; ");
        messages.push(ChatMessage::assistant(final_text));
        messages.push(ChatMessage::user(format!(
            "That SQL failed validation: {}. Fix it and respond with ONLY {{\"sql\": \"...\"}}.",
            last_error
        )));
    }

    // Persistent parse failure: hand the error object to correction.
    Ok(GenerationOutcome {
        sql: None,
        error: Some(last_error),
        retrieved_entities,
        usage,
    })
}

/// Extract SQL from the agent's final reply: the JSON contract first, then
/// a fenced ```sql block, then a bare SELECT.
pub fn extract_sql(text: &str) -> Option<String> {
    if let Some(parsed) = parse_json_lenient(text) {
        if let Some(sql) = parsed.get("sql").and_then(|v| v.as_str()) {
            let trimmed = sql.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    let fence = Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").ok()?;
    if let Some(cap) = fence.captures(text) {
        let body = cap.get(1)?.as_str().trim();
        if body.to_uppercase().starts_with("SELECT") || body.to_uppercase().starts_with("WITH") {
            return Some(body.to_string());
        }
    }

    let trimmed = text.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        return Some(trimmed.trim_end_matches(';').to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::harness::{agent_fixtures, spawn_scripted_gateway};

    #[tokio::test]
    async fn test_valid_sql_returned_first_attempt() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|_| {
            r#"{"sql": "SELECT COUNT(*) AS c FROM orders WHERE strftime('%Y', order_date) = '2008'"}"#
                .to_string()
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run(
            &ctx,
            GenerationRequest {
                sub_question: "How many orders in 2008?",
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(outcome.sql.unwrap().starts_with("SELECT COUNT(*)"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_sql_retried_then_fixed() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|req| {
            let was_corrected = req
                .messages
                .iter()
                .any(|m| m.content.contains("failed validation"));
            if was_corrected {
                r#"{"sql": "SELECT 1"}"#.to_string()
            } else {
                r#"{"sql": "SELECT FROM WHERE"}"#.to_string()
            }
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run(
            &ctx,
            GenerationRequest {
                sub_question: "anything",
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.sql.unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_persistent_failure_surfaces_error() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx =
            spawn_scripted_gateway(|_| r#"{"sql": "DELETE FROM orders"}"#.to_string());
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run(
            &ctx,
            GenerationRequest {
                sub_question: "anything",
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(outcome.sql.is_none());
        assert!(outcome.error.unwrap().contains("SELECT"));
    }

    #[test]
    fn test_extract_sql_variants() {
        assert_eq!(
            extract_sql(r#"{"sql": "SELECT 1"}"#).unwrap(),
            "SELECT 1"
        );
        assert_eq!(
            extract_sql("```sql\nSELECT 2\n```").unwrap(),
            "SELECT 2"
        );
        assert_eq!(extract_sql("SELECT 3;").unwrap(), "SELECT 3");
        assert_eq!(
            extract_sql("WITH t AS (SELECT 1) SELECT * FROM t").unwrap(),
            "WITH t AS (SELECT 1) SELECT * FROM t"
        );
        assert!(extract_sql("no sql here").is_none());
    }
}
