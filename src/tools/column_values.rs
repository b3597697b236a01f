//! Column-value lookup: maps free-text filter terms to canonical stored
//! values, exposed to the agents as the `get_column_values` tool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::stores::value_index::{ScoredValue, ValueIndex};

/// Input for the get_column_values tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnValuesInput {
    /// The filter term as the user phrased it.
    pub search_text: String,
    #[serde(default = "default_n")]
    pub n: usize,
}

fn default_n() -> usize {
    5
}

/// One match returned to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnValueMatch {
    pub entity: String,
    pub column: String,
    pub value: String,
}

/// Executor for the get_column_values tool.
pub struct ColumnValuesExecutor {
    index: Arc<ValueIndex>,
}

impl ColumnValuesExecutor {
    pub fn new(index: Arc<ValueIndex>) -> Self {
        Self { index }
    }

    pub async fn execute(&self, input: ColumnValuesInput) -> Result<String, String> {
        if input.search_text.trim().is_empty() {
            return Err("search_text cannot be empty".to_string());
        }

        let results: Vec<ScoredValue> =
            self.index.search(&input.search_text, input.n.max(1)).await;

        if results.is_empty() {
            return Ok(format!(
                "No stored values match '{}'. Use a LIKE filter instead of equality.",
                input.search_text
            ));
        }

        let matches: Vec<ColumnValueMatch> = results
            .into_iter()
            .map(|r| ColumnValueMatch {
                entity: r.entity,
                column: r.column,
                value: r.value,
            })
            .collect();

        serde_json::to_string_pretty(&matches)
            .map_err(|e| format!("Failed to serialize matches: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnValueRecord;
    use crate::embeddings::empty_embedder;

    #[tokio::test]
    async fn test_matches_serialized_as_json() {
        let index = Arc::new(
            ValueIndex::build(
                vec![ColumnValueRecord {
                    fqn: "db.s.address".to_string(),
                    entity: "address".to_string(),
                    schema: "s".to_string(),
                    database: "db".to_string(),
                    column: "CountryRegion".to_string(),
                    value: "United Kingdom".to_string(),
                    synonyms: vec!["UK".to_string()],
                }],
                empty_embedder(),
            )
            .await,
        );

        let executor = ColumnValuesExecutor::new(index);
        let text = executor
            .execute(ColumnValuesInput {
                search_text: "uk".to_string(),
                n: 5,
            })
            .await
            .unwrap();

        let parsed: Vec<ColumnValueMatch> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0].value, "United Kingdom");
        assert_eq!(parsed[0].column, "CountryRegion");
    }

    #[tokio::test]
    async fn test_miss_suggests_like_filter() {
        let index = Arc::new(ValueIndex::build(vec![], empty_embedder()).await);
        let executor = ColumnValuesExecutor::new(index);
        let text = executor
            .execute(ColumnValuesInput {
                search_text: "atlantis".to_string(),
                n: 5,
            })
            .await
            .unwrap();
        assert!(text.contains("LIKE"));
    }
}
