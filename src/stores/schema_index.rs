//! Schema store: a hybrid-searchable index over entity documents, plus the
//! relationship graph used for join-path expansion.
//!
//! Entities are loaded once at startup and never mutated; the index is
//! read-shared without locking.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::catalog::{EntityDocument, RelationshipGraph};
use crate::embeddings::{cosine_similarity, embed_passages, QueryEmbedder, SharedEmbedder};
use crate::stores::{blend_scores, keyword_overlap, tokenize};

/// One entity scored against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntity {
    pub entity: EntityDocument,
    pub score: f32,
}

struct IndexedEntity {
    doc: EntityDocument,
    embedding: Option<Vec<f32>>,
    terms: HashSet<String>,
}

/// Hybrid index over entity documents.
pub struct SchemaIndex {
    records: Vec<IndexedEntity>,
    graph: RelationshipGraph,
    embedder: Arc<QueryEmbedder>,
}

impl SchemaIndex {
    /// Build the index, embedding every entity's search text when a model
    /// is loaded. Unresolvable relationship references are logged; the
    /// dictionary marks genuinely external entities via `external_fqns`.
    pub async fn build(
        entities: Vec<EntityDocument>,
        shared_embedder: SharedEmbedder,
        external_fqns: &HashSet<String>,
    ) -> Self {
        let graph = RelationshipGraph::from_entities(&entities);

        let known: HashSet<String> = entities.iter().map(|e| e.fqn.clone()).collect();
        for missing in graph.unresolved_references(&known, external_fqns) {
            println!(
                "[SchemaIndex] Relationship references unknown entity: {}",
                missing
            );
        }

        let texts: Vec<String> = entities.iter().map(|e| e.search_text()).collect();
        let embeddings = embed_passages(&shared_embedder, texts).await;

        let records: Vec<IndexedEntity> = entities
            .into_iter()
            .enumerate()
            .map(|(i, doc)| {
                let terms = tokenize(&doc.search_text());
                IndexedEntity {
                    doc,
                    embedding: embeddings.as_ref().map(|e| e[i].clone()),
                    terms,
                }
            })
            .collect();

        println!("[SchemaIndex] Indexed {} entities", records.len());

        Self {
            records,
            graph,
            embedder: Arc::new(QueryEmbedder::new(shared_embedder)),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// Exact lookup by FQN (case-insensitive).
    pub fn get(&self, fqn: &str) -> Option<&EntityDocument> {
        self.records
            .iter()
            .map(|r| &r.doc)
            .find(|d| d.fqn.eq_ignore_ascii_case(fqn))
    }

    /// Hybrid search. When `selected_entities` is given, only entities whose
    /// FQN or name matches one of the selections are considered.
    pub async fn search(
        &self,
        query: &str,
        n: usize,
        selected_entities: Option<&[String]>,
    ) -> Vec<ScoredEntity> {
        let query_embedding = self.embedder.embed(query).await;
        let query_terms = tokenize(query);

        let mut scored: Vec<ScoredEntity> = self
            .records
            .iter()
            .filter(|r| match selected_entities {
                Some(selected) if !selected.is_empty() => selected.iter().any(|s| {
                    r.doc.fqn.eq_ignore_ascii_case(s)
                        || r.doc.entity.eq_ignore_ascii_case(s)
                        || r.doc.entity_name.eq_ignore_ascii_case(s)
                }),
                _ => true,
            })
            .map(|r| {
                let vector = match (&query_embedding, &r.embedding) {
                    (Some(q), Some(d)) => Some(cosine_similarity(q, d)),
                    _ => None,
                };
                let keyword = keyword_overlap(&query_terms, &r.terms);
                ScoredEntity {
                    entity: r.doc.clone(),
                    score: blend_scores(vector, keyword),
                }
            })
            .filter(|s| s.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }

    /// Entities along the join path between two FQNs, endpoints included.
    /// Lets generation pull in bridging entities without re-searching.
    pub fn entities_on_join_path(&self, from: &str, to: &str) -> Vec<EntityDocument> {
        let Some(path) = self.graph.find_join_path(from, to) else {
            return Vec::new();
        };
        path.iter().filter_map(|fqn| self.get(fqn).cloned()).collect()
    }
}

/// Load entity documents from a JSON file containing an array of documents.
pub async fn load_entities_from_json(path: &Path) -> Result<Vec<EntityDocument>, String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read schema store {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse schema store {}: {}", path.display(), e))
}
