//! Read-shared retrieval stores and the per-thread state store.
//!
//! The schema, column-value, and cache indices share one hybrid scoring
//! scheme: cosine similarity over embeddings blended with keyword overlap,
//! degrading to keyword-only when no embedding model is loaded.

pub mod query_cache;
pub mod schema_index;
pub mod state_store;
pub mod value_index;

use std::collections::HashSet;

/// Weight of the vector score in the blended ranking.
const VECTOR_WEIGHT: f32 = 0.65;

/// Lowercased alphanumeric tokens of length >= 2.
pub(crate) fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Fraction of query tokens present in the document's term set.
pub(crate) fn keyword_overlap(query_terms: &HashSet<String>, doc_terms: &HashSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let hits = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
    hits as f32 / query_terms.len() as f32
}

/// Blend vector and keyword scores into the rerank score. Keyword-only when
/// either side has no embedding.
pub(crate) fn blend_scores(vector: Option<f32>, keyword: f32) -> f32 {
    match vector {
        Some(v) => VECTOR_WEIGHT * v + (1.0 - VECTOR_WEIGHT) * keyword,
        None => keyword,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_punctuation_and_short_tokens() {
        let terms = tokenize("Total revenue, by country (2008)? a");
        assert!(terms.contains("total"));
        assert!(terms.contains("revenue"));
        assert!(terms.contains("country"));
        assert!(terms.contains("2008"));
        assert!(!terms.contains("a"));
    }

    #[test]
    fn test_keyword_overlap() {
        let query = tokenize("orders in 2008");
        let doc = tokenize("sales order header order date 2008");
        let overlap = keyword_overlap(&query, &doc);
        assert!(overlap > 0.0 && overlap <= 1.0);

        let miss = tokenize("employee headcount");
        assert_eq!(keyword_overlap(&miss, &doc), 0.0);
    }

    #[test]
    fn test_blend_prefers_vector_when_available() {
        let blended = blend_scores(Some(1.0), 0.0);
        assert!((blended - 0.65).abs() < 0.001);
        assert_eq!(blend_scores(None, 0.4), 0.4);
    }
}
