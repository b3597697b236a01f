//! Entity schema lookup: hybrid search over the schema store, exposed to
//! the agents as the `get_entity_schemas` tool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::EntityDocument;
use crate::stores::schema_index::SchemaIndex;

/// Input for the get_entity_schemas tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchemasInput {
    /// Natural-language description of the data needed.
    pub search_text: String,
    /// Maximum number of entities to return.
    #[serde(default = "default_n")]
    pub n: usize,
    /// Restrict the search to these entity names or FQNs.
    #[serde(default)]
    pub selected_entities: Option<Vec<String>>,
}

fn default_n() -> usize {
    3
}

/// Executor for the get_entity_schemas tool.
pub struct EntitySchemasExecutor {
    index: Arc<SchemaIndex>,
}

impl EntitySchemasExecutor {
    pub fn new(index: Arc<SchemaIndex>) -> Self {
        Self { index }
    }

    /// Run the search. Returns the prompt-ready rendering plus the raw
    /// documents so the caller can track which schemas are in play.
    pub async fn execute(
        &self,
        input: EntitySchemasInput,
    ) -> Result<(String, Vec<EntityDocument>), String> {
        if input.search_text.trim().is_empty() {
            return Err("search_text cannot be empty".to_string());
        }

        let results = self
            .index
            .search(
                &input.search_text,
                input.n.max(1),
                input.selected_entities.as_deref(),
            )
            .await;

        if results.is_empty() {
            return Ok((
                format!(
                    "No entities found matching '{}'. Try different terms.",
                    input.search_text
                ),
                Vec::new(),
            ));
        }

        let entities: Vec<EntityDocument> =
            results.iter().map(|r| r.entity.clone()).collect();
        let rendered: Vec<String> = results
            .iter()
            .map(|r| {
                format!(
                    "(relevance {:.2})\n{}",
                    r.score,
                    r.entity.render_for_prompt()
                )
            })
            .collect();

        Ok((rendered.join("\n"), entities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::empty_embedder;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_input_defaults() {
        let input: EntitySchemasInput =
            serde_json::from_str(r#"{"search_text": "sales orders"}"#).unwrap();
        assert_eq!(input.n, 3);
        assert!(input.selected_entities.is_none());
    }

    #[tokio::test]
    async fn test_empty_search_text_rejected() {
        let index = Arc::new(
            SchemaIndex::build(vec![], empty_embedder(), &HashSet::new()).await,
        );
        let executor = EntitySchemasExecutor::new(index);
        let err = executor
            .execute(EntitySchemasInput {
                search_text: "  ".to_string(),
                n: 3,
                selected_entities: None,
            })
            .await
            .unwrap_err();
        assert!(err.contains("empty"));
    }

    #[tokio::test]
    async fn test_no_match_returns_guidance() {
        let index = Arc::new(
            SchemaIndex::build(vec![], empty_embedder(), &HashSet::new()).await,
        );
        let executor = EntitySchemasExecutor::new(index);
        let (text, entities) = executor
            .execute(EntitySchemasInput {
                search_text: "anything".to_string(),
                n: 3,
                selected_entities: None,
            })
            .await
            .unwrap();
        assert!(text.contains("No entities found"));
        assert!(entities.is_empty());
    }
}
