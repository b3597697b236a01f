//! Column-value store: a hybrid-searchable index over distinct string
//! dimension values, used to map free-text filter terms to the canonical
//! values stored in the warehouse.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::ColumnValueRecord;
use crate::embeddings::{cosine_similarity, embed_passages, QueryEmbedder, SharedEmbedder};
use crate::stores::{blend_scores, keyword_overlap, tokenize};

/// One column value scored against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredValue {
    pub entity: String,
    pub fqn: String,
    pub column: String,
    pub value: String,
    pub score: f32,
}

struct IndexedValue {
    record: ColumnValueRecord,
    embedding: Option<Vec<f32>>,
    terms: HashSet<String>,
}

/// Hybrid index over `(entity, column, value)` triples.
pub struct ValueIndex {
    records: Vec<IndexedValue>,
    embedder: Arc<QueryEmbedder>,
}

impl ValueIndex {
    pub async fn build(records: Vec<ColumnValueRecord>, shared_embedder: SharedEmbedder) -> Self {
        let texts: Vec<String> = records.iter().map(|r| r.search_text()).collect();
        let embeddings = embed_passages(&shared_embedder, texts).await;

        let records: Vec<IndexedValue> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let terms = tokenize(&record.search_text());
                IndexedValue {
                    record,
                    embedding: embeddings.as_ref().map(|e| e[i].clone()),
                    terms,
                }
            })
            .collect();

        println!("[ValueIndex] Indexed {} column values", records.len());

        Self {
            records,
            embedder: Arc::new(QueryEmbedder::new(shared_embedder)),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Search for canonical values matching a free-text filter term.
    pub async fn search(&self, query: &str, n: usize) -> Vec<ScoredValue> {
        let query_embedding = self.embedder.embed(query).await;
        let query_terms = tokenize(query);

        let mut scored: Vec<ScoredValue> = self
            .records
            .iter()
            .map(|r| {
                let vector = match (&query_embedding, &r.embedding) {
                    (Some(q), Some(d)) => Some(cosine_similarity(q, d)),
                    _ => None,
                };
                let keyword = keyword_overlap(&query_terms, &r.terms);
                ScoredValue {
                    entity: r.record.entity.clone(),
                    fqn: r.record.fqn.clone(),
                    column: r.record.column.clone(),
                    value: r.record.value.clone(),
                    score: blend_scores(vector, keyword),
                }
            })
            .filter(|s| s.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }
}

/// Load column-value records from a JSON Lines file, skipping blank lines.
pub async fn load_values_from_jsonl(path: &Path) -> Result<Vec<ColumnValueRecord>, String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read value store {}: {}", path.display(), e))?;

    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: ColumnValueRecord = serde_json::from_str(trimmed).map_err(|e| {
            format!(
                "Failed to parse value store {} line {}: {}",
                path.display(),
                line_no + 1,
                e
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::empty_embedder;

    fn value(column: &str, value: &str, synonyms: &[&str]) -> ColumnValueRecord {
        ColumnValueRecord {
            fqn: "adventureworks.saleslt.address".to_string(),
            entity: "address".to_string(),
            schema: "saleslt".to_string(),
            database: "adventureworks".to_string(),
            column: column.to_string(),
            value: value.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_synonym_match() {
        let index = ValueIndex::build(
            vec![
                value("CountryRegion", "United Kingdom", &["UK", "Britain"]),
                value("CountryRegion", "Canada", &[]),
            ],
            empty_embedder(),
        )
        .await;

        let results = index.search("orders shipped to britain", 3).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].value, "United Kingdom");
        assert_eq!(results[0].column, "CountryRegion");
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let index =
            ValueIndex::build(vec![value("City", "London", &[])], empty_embedder()).await;
        let results = index.search("quarterly headcount", 3).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.jsonl");
        tokio::fs::write(
            &path,
            r#"{"FQN": "db.s.address", "Entity": "address", "Schema": "s", "Database": "db", "Column": "City", "Value": "London", "Synonyms": []}

{"FQN": "db.s.address", "Entity": "address", "Schema": "s", "Database": "db", "Column": "City", "Value": "Paris", "Synonyms": []}"#,
        )
        .await
        .unwrap();

        let records = load_values_from_jsonl(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value, "Paris");
    }
}
