//! Answer-and-sources agent: composes the final narrative from every
//! sub-question's `(sql, rows)` results using the decomposition's
//! combination logic.

use serde_json::json;

use crate::actors::model_gateway_actor::{complete, CompletionRequest};
use crate::agents::AgentContext;
use crate::json_repair::parse_json_lenient;
use crate::prompts::render_prompt;
use crate::protocol::{ChatMessage, TokenUsage};
use crate::run_state::{Run, SubQuestionStatus};

/// Outcome of the answer agent.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub answer: String,
    pub follow_up_suggestions: Option<Vec<String>>,
    pub usage: Option<TokenUsage>,
}

/// Render every sub-question result for the answer prompt, in round +
/// index order.
pub fn render_results(run: &Run) -> String {
    let mut sections = Vec::new();
    for (round_index, round) in run.rounds.iter().enumerate() {
        for sub in round {
            let mut section = format!(
                "### Round {} - {}\n",
                round_index + 1,
                sub.text
            );
            match (&sub.resolved_sql, &sub.resolved_rows) {
                (Some(sql), Some(rows)) if sub.status == SubQuestionStatus::Succeeded => {
                    section.push_str(&format!("SQL: {}\n", sql));
                    section.push_str(&rows.to_markdown());
                }
                _ => {
                    let error = sub.error.as_deref().unwrap_or("no result produced");
                    section.push_str(&format!("FAILED: {}\n", error));
                }
            }
            sections.push(section);
        }
    }
    sections.join("\n")
}

/// Run the answer agent over a completed run.
pub async fn run_agent(ctx: &AgentContext<'_>, run: &Run) -> Result<AnswerOutcome, String> {
    let system_prompt = render_prompt(
        "answer",
        json!({
            "use_case": ctx.config.use_case,
            "question": run.user_message,
            "combination_logic": run
                .combination_logic
                .as_deref()
                .unwrap_or("single question, single answer"),
            "results": render_results(run),
            "generate_follow_up_suggestions": ctx.config.generate_follow_up_suggestions,
        }),
    )?;

    let response = complete(
        ctx.gateway_tx,
        CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(run.user_message.clone()),
        ]),
    )
    .await?;

    let (answer, follow_ups) = match parse_json_lenient(&response.content) {
        Some(parsed) => {
            let answer = parsed
                .get("answer")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| response.content.clone());
            let follow_ups = parsed
                .get("follow_up_suggestions")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect::<Vec<_>>()
                })
                .filter(|v: &Vec<String>| !v.is_empty());
            (answer, follow_ups)
        }
        None => (response.content.clone(), None),
    };

    Ok(AnswerOutcome {
        answer,
        follow_up_suggestions: if ctx.config.generate_follow_up_suggestions {
            follow_ups
        } else {
            None
        },
        usage: response.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryRows;
    use crate::run_state::SubQuestion;
    use crate::tests::harness::{agent_fixtures, spawn_scripted_gateway};
    use serde_json::json as j;

    fn run_with_results() -> Run {
        let mut run = Run::new("t", "How many orders in 2008 and 2009?");
        let mut first = SubQuestion::new("orders in 2008", 0, run.id);
        first.status = SubQuestionStatus::Succeeded;
        first.resolved_sql = Some("SELECT COUNT(*) FROM orders WHERE y = 2008".to_string());
        first.resolved_rows = Some(QueryRows {
            columns: vec!["c".to_string()],
            rows: vec![vec![j!(42)]],
            truncated: false,
        });
        let mut second = SubQuestion::new("orders in 2009", 0, run.id);
        second.status = SubQuestionStatus::Failed;
        second.error = Some("engine unreachable".to_string());
        run.rounds.push(vec![first, second]);
        run.combination_logic = Some("list both years".to_string());
        run
    }

    #[test]
    fn test_render_results_includes_success_and_failure() {
        let rendered = render_results(&run_with_results());
        assert!(rendered.contains("SELECT COUNT(*)"));
        assert!(rendered.contains("| 42 |"));
        assert!(rendered.contains("FAILED: engine unreachable"));
    }

    #[tokio::test]
    async fn test_answer_parsed_from_json_contract() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|req| {
            assert!(req.messages[0].content.contains("list both years"));
            r#"{"answer": "There were **42 orders** in 2008. The 2009 figure is unavailable."}"#
                .to_string()
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run_agent(&ctx, &run_with_results()).await.unwrap();
        assert!(outcome.answer.contains("42 orders"));
        assert!(outcome.follow_up_suggestions.is_none());
    }

    #[tokio::test]
    async fn test_follow_ups_only_when_enabled() {
        let (tools, mut config) = agent_fixtures().await;
        config.generate_follow_up_suggestions = true;
        let gateway_tx = spawn_scripted_gateway(|_| {
            r#"{"answer": "42.", "follow_up_suggestions": ["How many orders in 2010?"]}"#
                .to_string()
        });
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run_agent(&ctx, &run_with_results()).await.unwrap();
        assert_eq!(outcome.follow_up_suggestions.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prose_reply_used_verbatim() {
        let (tools, config) = agent_fixtures().await;
        let gateway_tx = spawn_scripted_gateway(|_| "There were 42 orders.".to_string());
        let ctx = AgentContext {
            gateway_tx: &gateway_tx,
            tools: &tools,
            config: &config,
        };

        let outcome = run_agent(&ctx, &run_with_results()).await.unwrap();
        assert_eq!(outcome.answer, "There were 42 orders.");
    }
}
