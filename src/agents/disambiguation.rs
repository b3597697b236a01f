//! Disambiguation agent: decides whether a sub-question maps cleanly onto
//! the retrieved schemas, or whether the caller must choose between
//! competing columns or filter values first.

use serde_json::json;

use crate::actors::model_gateway_actor::{complete, CompletionRequest};
use crate::agents::AgentContext;
use crate::catalog::EntityDocument;
use crate::json_repair::parse_json_lenient;
use crate::prompts::render_prompt;
use crate::protocol::{ChatMessage, DisambiguationQuestion, TokenUsage};

/// Outcome of the disambiguation step.
#[derive(Debug)]
pub enum DisambiguationOutcome {
    /// Mappings are unambiguous; the serialized mapping JSON is carried into
    /// the generation prompt.
    Clear { mapping: String },
    /// The caller must answer before generation can proceed.
    NeedsClarification(Vec<DisambiguationQuestion>),
}

/// Run the disambiguation agent over the retrieved schemas.
pub async fn run(
    ctx: &AgentContext<'_>,
    sub_question: &str,
    schemas: &[EntityDocument],
    column_value_matches: Option<&str>,
) -> Result<(DisambiguationOutcome, Option<TokenUsage>), String> {
    let rendered_schemas: Vec<String> = schemas.iter().map(|e| e.render_for_prompt()).collect();

    let system_prompt = render_prompt(
        "disambiguation",
        json!({
            "use_case": ctx.config.use_case,
            "target_engine": ctx.config.target_engine.display_name(),
            "question": sub_question,
            "schemas": rendered_schemas.join("\n"),
            "column_value_matches": column_value_matches.unwrap_or(""),
        }),
    )?;

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(sub_question),
    ];
    let response = complete(ctx.gateway_tx, CompletionRequest::new(messages)).await?;

    let Some(parsed) = parse_json_lenient(&response.content) else {
        // No contract JSON: assume the mapping is clear and let generation
        // proceed with the schemas as-is.
        return Ok((
            DisambiguationOutcome::Clear {
                mapping: String::new(),
            },
            response.usage,
        ));
    };

    if let Some(questions) = parsed.get("disambiguation").and_then(|d| d.as_array()) {
        let questions: Vec<DisambiguationQuestion> = questions
            .iter()
            .map(|q| {
                let text = q
                    .get("question")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Which option did you mean?")
                    .to_string();
                let mut choices: Vec<String> = Vec::new();
                for key in ["matching_columns", "matching_filter_values", "other_user_choices"] {
                    if let Some(arr) = q.get(key).and_then(|v| v.as_array()) {
                        choices.extend(arr.iter().filter_map(|v| v.as_str().map(String::from)));
                    }
                }
                DisambiguationQuestion { text, choices }
            })
            .collect();

        if !questions.is_empty() {
            return Ok((
                DisambiguationOutcome::NeedsClarification(questions),
                response.usage,
            ));
        }
    }

    Ok((
        DisambiguationOutcome::Clear {
            mapping: parsed.to_string(),
        },
        response.usage,
    ))
}
