//! Embedding support for the retrieval indices.
//!
//! The embedding model is optional: when none is loaded the hybrid indices
//! fall back to keyword-only scoring, which keeps tests and offline runs
//! working without an ONNX download.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Shared handle to the optional embedding model.
pub type SharedEmbedder = Arc<RwLock<Option<Arc<TextEmbedding>>>>;

/// Create an empty (unloaded) embedder handle.
pub fn empty_embedder() -> SharedEmbedder {
    Arc::new(RwLock::new(None))
}

/// Load the default embedding model into the shared handle.
/// Initialization downloads model weights on first use, so it runs on the
/// blocking pool.
pub async fn init_embedder(shared: &SharedEmbedder) -> Result<(), String> {
    {
        let guard = shared.read().await;
        if guard.is_some() {
            return Ok(());
        }
    }

    let model = tokio::task::spawn_blocking(|| {
        TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
    })
    .await
    .map_err(|e| format!("Embedding init task panicked: {}", e))?
    .map_err(|e| format!("Failed to initialize embedding model: {}", e))?;

    let mut guard = shared.write().await;
    *guard = Some(Arc::new(model));
    println!("[Embeddings] Model loaded");
    Ok(())
}

/// Embed a batch of passages for index construction.
/// Returns `None` when no model is loaded.
pub async fn embed_passages(
    shared: &SharedEmbedder,
    texts: Vec<String>,
) -> Option<Vec<Vec<f32>>> {
    let model = { shared.read().await.clone() }?;
    match model.embed(texts, None) {
        Ok(embeddings) => Some(embeddings),
        Err(e) => {
            println!("[Embeddings] Passage embedding failed: {}", e);
            None
        }
    }
}

/// Query-side embedder with an LRU cache, shared by the three indices.
pub struct QueryEmbedder {
    shared: SharedEmbedder,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl QueryEmbedder {
    pub fn new(shared: SharedEmbedder) -> Self {
        Self {
            shared,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(256).unwrap())),
        }
    }

    /// Embed a query string, consulting the cache first.
    /// Returns `None` when no model is loaded or embedding fails.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(hit) = cache.get(text) {
                return Some(hit.clone());
            }
        }

        let model = { self.shared.read().await.clone() }?;
        let embedding = match model.embed(vec![text.to_string()], None) {
            Ok(mut embeddings) if !embeddings.is_empty() => embeddings.remove(0),
            Ok(_) => return None,
            Err(e) => {
                println!("[Embeddings] Query embedding failed: {}", e);
                return None;
            }
        };

        let mut cache = self.cache.lock().unwrap();
        cache.put(text.to_string(), embedding.clone());
        Some(embedding)
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.try_read().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_query_embedder_without_model() {
        let embedder = QueryEmbedder::new(empty_embedder());
        assert!(!embedder.is_loaded());
        assert!(embedder.embed("total revenue by country").await.is_none());
    }
}
