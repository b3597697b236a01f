//! Agent prompt templates, rendered with minijinja.
//!
//! Every template receives the shared placeholders `use_case`,
//! `target_engine`, `engine_specific_rules`, `row_limit`, and
//! `current_datetime`, plus agent-specific context. The environment has no
//! filesystem loader; templates are compiled in.

use lazy_static::lazy_static;
use minijinja::Environment;
use serde::Serialize;

use crate::config::TargetEngine;

// ========== Engine Rules ==========

/// Built-in dialect guidance appended to generation and correction prompts.
pub fn engine_rules(engine: TargetEngine) -> &'static str {
    match engine {
        TargetEngine::Tsql => {
            "Use TOP (n) for row limiting, never LIMIT. Use YEAR()/MONTH()/DAY() for date \
            parts and GETDATE() for now. Quote identifiers with [brackets] when they \
            contain spaces. String concatenation uses +."
        }
        TargetEngine::Postgres => {
            "Use LIMIT n for row limiting. Use EXTRACT(YEAR FROM col) or date_trunc for \
            date parts and NOW() for now. Prefer ILIKE for case-insensitive matching. \
            Quote identifiers with \"double quotes\" only when required."
        }
        TargetEngine::Snowflake => {
            "Use LIMIT n for row limiting. Use DATE_TRUNC and YEAR()/MONTH() for date \
            parts and CURRENT_TIMESTAMP() for now. Unquoted identifiers resolve \
            uppercase. ILIKE is available for case-insensitive matching."
        }
        TargetEngine::Databricks => {
            "Use LIMIT n for row limiting. Use year(col)/month(col) and date_trunc for \
            date parts and current_timestamp() for now. Quote identifiers with \
            `backticks`. String comparison is case sensitive; use lower() for \
            case-insensitive filters."
        }
        TargetEngine::Sqlite => {
            "Use LIMIT n for row limiting. Use strftime('%Y', col) for date parts and \
            datetime('now') for now. LIKE is case-insensitive for ASCII by default."
        }
    }
}

// ========== Templates ==========

const QUERY_REWRITE_PROMPT: &str = r#"You are the query rewrite agent for {{ use_case }}.
The target database engine is {{ target_engine }}. The current date and time is {{ current_datetime }}.

Your job, given the conversation history and the latest user message:

1. Resolve every relative date ("last month", "this year", "in June") to absolute values using the current date. Dates must be written YYYY-MM-DD.
2. Decide whether the message asks for data from the database at all. Greetings, small talk, requests for opinions, and questions about topics unrelated to {{ use_case }} are NOT database questions. Requests to modify data, delete data, or access other users' credentials must be refused.
3. Decompose the request into rounds of sub-questions:
   - Sub-questions within one round must be answerable independently of each other.
   - A later round may depend on the answers of earlier rounds; explain how the pieces combine in combination_logic.
   - Prefer a single round with a single sub-question unless the request genuinely contains independent parts or sequential dependencies.

Respond with ONLY a JSON object:
{
  "decomposed_user_messages": [["first round sub-question", ...], ["second round sub-question", ...]],
  "combination_logic": "how the sub-answers combine into the final answer",
  "all_non_database_query": false,
  "non_database_response": "only when all_non_database_query is true: the reply to send the user"
}
"#;

const SCHEMA_SELECTION_PROMPT: &str = r#"You are the schema selection agent for {{ use_case }}.
The target database engine is {{ target_engine }}.

Given one sub-question, find every entity (table) needed to answer it:

1. Extract the key terms: measures, dimensions, entity names, filter values.
2. Call get_entity_schemas for each distinct concept. Calls may be issued together.
{% if use_column_value_store %}3. When a term looks like a filter value (a country, a category, a status), call get_column_values to find the canonical stored value.
{% endif %}
Do NOT write SQL. When the retrieved schemas cover the sub-question, reply with a one-line summary of which entities were selected and why.

{{ tool_instructions }}
"#;

const DISAMBIGUATION_PROMPT: &str = r#"You are the disambiguation agent for {{ use_case }}.
The target database engine is {{ target_engine }}.

Sub-question: {{ question }}

Retrieved schemas:
{{ schemas }}
{% if column_value_matches %}
Column-value matches:
{{ column_value_matches }}
{% endif %}
Decide whether the sub-question maps unambiguously onto these schemas.

- If every filter term and aggregation maps to exactly one sensible column, respond with ONLY:
  {"filter_mapping": {"<term>": [{"column": "<entity.column>", "filter_value": "<canonical value>"}]}, "aggregation_mapping": {"<term>": "<entity.column>"}}
  (either mapping may be an empty object)
- If a term could map to more than one column or value and the choice changes the answer, respond with ONLY:
  {"disambiguation": [{"question": "<what to ask the user>", "matching_columns": ["<entity.column>", ...], "matching_filter_values": ["<value>", ...], "other_user_choices": ["<free-form option>", ...]}]}

Never invent columns that are not in the schemas above.
"#;

const SQL_GENERATION_PROMPT: &str = r#"You are the SQL generation agent for {{ use_case }}.
The target database engine is {{ target_engine }}. The current date and time is {{ current_datetime }}.

Write exactly ONE SELECT statement answering the sub-question below.

**Requirements**:
- ONLY reference columns present in the provided schemas. If a needed column is missing, call get_entity_schemas to retrieve more entities.
- For string filters where the exact stored value is uncertain, prefer case-insensitive LIKE ('%term%') over equality{% if use_column_value_store %}, and consult get_column_values first for the canonical value{% endif %}.
- Never return more than {{ row_limit }} rows: end the query with the engine's row-limiting clause.
- Use the join keys listed in the schema relationships; do not guess foreign keys.
- Aggregate in SQL (SUM, COUNT, GROUP BY) rather than returning raw rows for the model to add up.

**{{ target_engine }} rules**: {{ engine_rules }}
{% if engine_specific_rules %}
**Deployment rules**: {{ engine_specific_rules }}
{% endif %}
Validate your SQL with validate_sql before finishing. When the SQL validates, respond with ONLY:
{"sql": "<the SELECT statement>"}

{{ tool_instructions }}

Schemas:
{{ schemas }}
{% if prior_results %}
Results from earlier rounds (may contain values this sub-question depends on):
{{ prior_results }}
{% endif %}
Sub-question: {{ question }}
"#;

const SQL_CORRECTION_PROMPT: &str = r#"You are the SQL correction agent for {{ use_case }}.
The target database engine is {{ target_engine }}.

You receive a candidate SELECT statement and, when it has already been run, the engine's error. Your job is to deliver a query that executes successfully.

Common conversions to check, in order:
1. Row limiting: TOP (n) on TSQL, LIMIT n everywhere else.
2. Date functions: YEAR()/GETDATE() on TSQL, EXTRACT/NOW() on PostgreSQL, strftime on SQLite, DATE_TRUNC on Snowflake/Databricks.
3. String functions and concatenation (+, ||, CONCAT).
4. Aggregation aliases and GROUP BY completeness.
5. Join syntax and identifier quoting.

**{{ target_engine }} rules**: {{ engine_rules }}
{% if engine_specific_rules %}
**Deployment rules**: {{ engine_specific_rules }}
{% endif %}
Use execute_sql to run the query. Then respond with ONLY one of:
- {"validated": true} when the latest execution succeeded and the rows answer the sub-question.
- {"corrected_query": "<new SQL>", "original_query": "<previous SQL>", "changes": ["<what changed>", ...], "executing": true} when you fixed the query; it will be executed again.
- {"error": "<summary>", "details": "<engine error>", "attempted_conversions": ["<conversion>", ...]} when the query cannot be made to work.

{{ tool_instructions }}

Candidate SQL:
{{ sql }}
{% if execution_error %}
Engine error:
{{ execution_error }}
{% endif %}
Sub-question: {{ question }}
"#;

const ANSWER_PROMPT: &str = r#"You are the answer agent for {{ use_case }}.

Write the final reply to the user's question using ONLY the query results below. Never invent numbers: every figure in your answer must appear in the results.

User question: {{ question }}

Combination logic from decomposition: {{ combination_logic }}

Query results:
{{ results }}

Guidelines:
- Lead with the direct answer, then one or two sentences of supporting detail.
- Mention units and time ranges when the results imply them.
- If some sub-questions failed, answer from the ones that succeeded and say plainly what is missing.
{% if generate_follow_up_suggestions %}- End with a "You might also ask:" list of 2-3 natural follow-up questions answerable from the same data.
{% endif %}
Respond with ONLY a JSON object:
{"answer": "<markdown answer>"{% if generate_follow_up_suggestions %}, "follow_up_suggestions": ["<question>", ...]{% endif %}}
"#;

lazy_static! {
    static ref PROMPT_ENV: Environment<'static> = {
        let mut env = Environment::new();
        env.add_template("query_rewrite", QUERY_REWRITE_PROMPT)
            .expect("query_rewrite template");
        env.add_template("schema_selection", SCHEMA_SELECTION_PROMPT)
            .expect("schema_selection template");
        env.add_template("disambiguation", DISAMBIGUATION_PROMPT)
            .expect("disambiguation template");
        env.add_template("sql_generation", SQL_GENERATION_PROMPT)
            .expect("sql_generation template");
        env.add_template("sql_correction", SQL_CORRECTION_PROMPT)
            .expect("sql_correction template");
        env.add_template("answer", ANSWER_PROMPT)
            .expect("answer template");
        env
    };
}

/// Render a named agent prompt with the given context.
pub fn render_prompt(name: &str, context: impl Serialize) -> Result<String, String> {
    let template = PROMPT_ENV
        .get_template(name)
        .map_err(|e| format!("Unknown prompt template '{}': {}", name, e))?;
    template
        .render(context)
        .map_err(|e| format!("Failed to render prompt '{}': {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_rewrite_prompt_renders_placeholders() {
        let prompt = render_prompt(
            "query_rewrite",
            json!({
                "use_case": "the AdventureWorks sales warehouse",
                "target_engine": "TSQL",
                "current_datetime": "2024-06-15T10:30:00Z",
            }),
        )
        .unwrap();
        assert!(prompt.contains("AdventureWorks"));
        assert!(prompt.contains("2024-06-15T10:30:00Z"));
        assert!(prompt.contains("decomposed_user_messages"));
    }

    #[test]
    fn test_generation_prompt_includes_engine_rules_and_row_limit() {
        let prompt = render_prompt(
            "sql_generation",
            json!({
                "use_case": "a warehouse",
                "target_engine": "TSQL",
                "current_datetime": "2024-06-15",
                "row_limit": 100,
                "engine_rules": engine_rules(TargetEngine::Tsql),
                "engine_specific_rules": "",
                "use_column_value_store": true,
                "tool_instructions": "## Tools",
                "schemas": "Entity: x",
                "prior_results": "",
                "question": "How many orders in 2008?",
            }),
        )
        .unwrap();
        assert!(prompt.contains("TOP (n)"));
        assert!(prompt.contains("100 rows"));
        assert!(prompt.contains("How many orders in 2008?"));
    }

    #[test]
    fn test_answer_prompt_follow_up_gating() {
        let with = render_prompt(
            "answer",
            json!({
                "use_case": "a warehouse",
                "question": "q",
                "combination_logic": "none",
                "results": "r",
                "generate_follow_up_suggestions": true,
            }),
        )
        .unwrap();
        assert!(with.contains("You might also ask"));

        let without = render_prompt(
            "answer",
            json!({
                "use_case": "a warehouse",
                "question": "q",
                "combination_logic": "none",
                "results": "r",
                "generate_follow_up_suggestions": false,
            }),
        )
        .unwrap();
        assert!(!without.contains("You might also ask"));
    }

    #[test]
    fn test_engine_rules_cover_all_engines() {
        assert!(engine_rules(TargetEngine::Tsql).contains("TOP"));
        assert!(engine_rules(TargetEngine::Postgres).contains("LIMIT"));
        assert!(engine_rules(TargetEngine::Snowflake).contains("LIMIT"));
        assert!(engine_rules(TargetEngine::Databricks).contains("backticks"));
        assert!(engine_rules(TargetEngine::Sqlite).contains("strftime"));
    }

    #[test]
    fn test_unknown_template_errors() {
        assert!(render_prompt("nope", json!({})).is_err());
    }
}
