//! SQL correction agent: executes a candidate SELECT and repairs dialect
//! and runtime errors until it runs, up to the configured attempt budget.

use serde_json::json;

use crate::actors::model_gateway_actor::{complete, CompletionRequest};
use crate::agents::AgentContext;
use crate::json_repair::parse_json_lenient;
use crate::prompts::{engine_rules, render_prompt};
use crate::protocol::{ChatMessage, QueryRows, TokenUsage};
use crate::tools::execute_sql::{ExecuteSqlExecutor, ExecuteSqlInput};

/// Outcome of the correction agent.
#[derive(Debug)]
pub enum CorrectionOutcome {
    /// The query executed successfully; these are the live rows.
    Validated {
        sql: String,
        rows: QueryRows,
        usage: TokenUsage,
    },
    /// The query could not be made to run.
    Failed {
        error: String,
        details: String,
        usage: TokenUsage,
    },
}

/// Run the correction agent on a candidate query. The first execution is
/// unconditional: cached pre-run SQL is refreshed here rather than trusted.
pub async fn run(
    ctx: &AgentContext<'_>,
    sub_question: &str,
    initial_sql: &str,
) -> Result<CorrectionOutcome, String> {
    let executor = ExecuteSqlExecutor::new(
        ctx.tools.sql_tx.clone(),
        ctx.config.target_engine,
        ctx.config.row_limit,
    );

    let mut usage = TokenUsage::default();
    let mut current_sql = initial_sql.to_string();
    let mut last_error = String::new();
    let mut attempted_changes: Vec<String> = Vec::new();

    for attempt in 1..=ctx.config.max_correction_attempts {
        let execution = executor
            .execute(ExecuteSqlInput {
                sql: current_sql.clone(),
            })
            .await;

        match execution {
            Ok((output, Some(rows))) if output.success => {
                println!(
                    "[SqlCorrection] Query validated on attempt {} ({} rows)",
                    attempt,
                    rows.row_count()
                );
                return Ok(CorrectionOutcome::Validated {
                    sql: current_sql,
                    rows,
                    usage,
                });
            }
            Ok((output, _)) => {
                last_error = output
                    .error
                    .unwrap_or_else(|| "execution failed without detail".to_string());
            }
            Err(e) => {
                last_error = e;
            }
        }

        if attempt == ctx.config.max_correction_attempts {
            break;
        }

        println!(
            "[SqlCorrection] Attempt {} failed: {}",
            attempt,
            last_error.chars().take(160).collect::<String>()
        );

        let system_prompt = render_prompt(
            "sql_correction",
            json!({
                "use_case": ctx.config.use_case,
                "target_engine": ctx.config.target_engine.display_name(),
                "engine_rules": engine_rules(ctx.config.target_engine),
                "engine_specific_rules": ctx.config.engine_specific_rules,
                "tool_instructions": "",
                "sql": current_sql,
                "execution_error": last_error,
                "question": sub_question,
            }),
        )?;

        let response = complete(
            ctx.gateway_tx,
            CompletionRequest::new(vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(format!(
                    "Fix the query so it executes on {}.",
                    ctx.config.target_engine.display_name()
                )),
            ]),
        )
        .await?;
        if let Some(u) = response.usage {
            usage.prompt_tokens += u.prompt_tokens;
            usage.completion_tokens += u.completion_tokens;
        }

        let Some(parsed) = parse_json_lenient(&response.content) else {
            return Ok(CorrectionOutcome::Failed {
                error: "Correction agent produced no usable reply".to_string(),
                details: last_error,
                usage,
            });
        };

        if let Some(error) = parsed.get("error").and_then(|v| v.as_str()) {
            let details = parsed
                .get("details")
                .and_then(|v| v.as_str())
                .unwrap_or(&last_error)
                .to_string();
            return Ok(CorrectionOutcome::Failed {
                error: error.to_string(),
                details,
                usage,
            });
        }

        match parsed.get("corrected_query").and_then(|v| v.as_str()) {
            Some(corrected) => {
                if let Some(changes) = parsed.get("changes").and_then(|v| v.as_array()) {
                    attempted_changes.extend(
                        changes.iter().filter_map(|c| c.as_str().map(String::from)),
                    );
                }
                current_sql = corrected.to_string();
            }
            None => {
                // `validated: true` without a successful execution, or an
                // off-contract reply: nothing left to try.
                return Ok(CorrectionOutcome::Failed {
                    error: "Correction agent offered no corrected query".to_string(),
                    details: last_error,
                    usage,
                });
            }
        }
    }

    let details = if attempted_changes.is_empty() {
        last_error.clone()
    } else {
        format!(
            "{} (attempted conversions: {})",
            last_error,
            attempted_changes.join(", ")
        )
    };

    Ok(CorrectionOutcome::Failed {
        error: format!(
            "Query failed after {} correction attempts",
            ctx.config.max_correction_attempts
        ),
        details,
        usage,
    })
}
