//! Schema selection agent: extracts key terms from a sub-question and
//! retrieves the entities needed to answer it via the schema-store tools.
//! Produces no SQL.

use serde_json::json;

use crate::agents::{run_tool_loop, AgentContext, ToolLoopResult};
use crate::catalog::EntityDocument;
use crate::prompts::render_prompt;
use crate::protocol::{ChatMessage, TokenUsage};
use crate::tool_registry::{builtin_tool_schemas, render_tool_instructions};

/// Outcome of schema selection: the union of retrieved entity documents.
#[derive(Debug)]
pub struct SchemaSelectionOutcome {
    pub entities: Vec<EntityDocument>,
    pub summary: String,
    pub usage: TokenUsage,
}

/// Run the selection agent for one sub-question.
pub async fn run(
    ctx: &AgentContext<'_>,
    sub_question: &str,
) -> Result<SchemaSelectionOutcome, String> {
    // Selection only needs the retrieval tools.
    let tools: Vec<_> = builtin_tool_schemas(ctx.config.use_column_value_store)
        .into_iter()
        .filter(|t| t.name == "get_entity_schemas" || t.name == "get_column_values")
        .collect();

    let system_prompt = render_prompt(
        "schema_selection",
        json!({
            "use_case": ctx.config.use_case,
            "target_engine": ctx.config.target_engine.display_name(),
            "use_column_value_store": ctx.config.use_column_value_store,
            "tool_instructions": render_tool_instructions(&tools),
        }),
    )?;

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(sub_question),
    ];

    let ToolLoopResult {
        final_text,
        usage,
        retrieved_entities,
        ..
    } = run_tool_loop(ctx, messages).await?;

    println!(
        "[SchemaSelection] Retrieved {} entities for '{}'",
        retrieved_entities.len(),
        sub_question
    );

    Ok(SchemaSelectionOutcome {
        entities: retrieved_entities,
        summary: final_text,
        usage,
    })
}
