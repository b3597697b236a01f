//! Query cache: previously answered questions with their SQL templates,
//! searchable by question similarity.
//!
//! Cache SQL is a Jinja template rendered at lookup time with a whitelisted
//! set of time placeholders plus the caller's injected parameters. The
//! template environment has no filesystem loader and strict undefined
//! behavior, so a template referencing anything outside that scope fails to
//! render and the hit is discarded.

use chrono::{DateTime, Utc};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::CacheWriteStrategy;
use crate::embeddings::{cosine_similarity, QueryEmbedder, SharedEmbedder};
use crate::protocol::QueryRows;
use crate::stores::{blend_scores, keyword_overlap, tokenize};

/// One cached question with its SQL template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub question_text: String,
    pub sql_template: String,
    /// FQNs of the entities the SQL touches.
    pub schemas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_run_rows: Option<QueryRows>,
    pub created_at: DateTime<Utc>,
}

/// A successful cache lookup with the template already rendered.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: CacheEntry,
    pub rendered_sql: String,
    pub score: f32,
}

struct IndexedEntry {
    entry: CacheEntry,
    embedding: Option<Vec<f32>>,
    terms: HashSet<String>,
}

#[derive(Default)]
struct CacheInner {
    records: Vec<IndexedEntry>,
    by_hash: HashMap<String, usize>,
    /// Entries awaiting positive feedback under that write strategy.
    pending_feedback: HashMap<String, CacheEntry>,
}

/// Append-shared query cache with hybrid lookup.
pub struct QueryCache {
    inner: RwLock<CacheInner>,
    embedder: Arc<QueryEmbedder>,
    hit_threshold: f32,
    strategy: CacheWriteStrategy,
    spill_path: Option<PathBuf>,
}

impl QueryCache {
    pub fn new(
        shared_embedder: SharedEmbedder,
        hit_threshold: f32,
        strategy: CacheWriteStrategy,
        spill_path: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            embedder: Arc::new(QueryEmbedder::new(shared_embedder)),
            hit_threshold,
            strategy,
            spill_path,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Seed the cache with entries prepared offline.
    pub async fn seed(&self, entries: Vec<CacheEntry>) {
        for entry in entries {
            if let Err(e) = self.upsert(entry).await {
                println!("[QueryCache] Seed failed: {}", e);
            }
        }
    }

    /// Look up the cache by question similarity. Returns a hit only when the
    /// top blended score reaches the configured threshold and the template
    /// renders cleanly with the given parameters.
    pub async fn lookup(
        &self,
        question: &str,
        injected_parameters: &HashMap<String, Value>,
    ) -> Option<CacheHit> {
        let query_embedding = self.embedder.embed(question).await;
        let query_terms = tokenize(question);

        let inner = self.inner.read().await;
        let best = inner
            .records
            .iter()
            .map(|r| {
                let vector = match (&query_embedding, &r.embedding) {
                    (Some(q), Some(d)) => Some(cosine_similarity(q, d)),
                    _ => None,
                };
                // Exact question text always qualifies as a perfect hit.
                let keyword = if r.entry.question_text.eq_ignore_ascii_case(question) {
                    1.0
                } else {
                    keyword_overlap(&query_terms, &r.terms)
                };
                (r, blend_scores(vector.map(|v| v.max(keyword)), keyword))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        let (record, score) = best;
        if score < self.hit_threshold {
            return None;
        }

        match render_cache_sql(&record.entry.sql_template, injected_parameters, Utc::now()) {
            Ok(rendered_sql) => Some(CacheHit {
                entry: record.entry.clone(),
                rendered_sql,
                score,
            }),
            Err(e) => {
                println!("[QueryCache] Template render failed, ignoring hit: {}", e);
                None
            }
        }
    }

    /// Record a successful generation according to the write strategy.
    /// Failures are non-fatal: callers log and continue.
    pub async fn record_success(&self, entry: CacheEntry) -> Result<(), String> {
        match self.strategy {
            CacheWriteStrategy::Never => Ok(()),
            CacheWriteStrategy::Always => {
                self.spill(&entry).await;
                self.upsert(entry).await
            }
            CacheWriteStrategy::OfflineBatch => {
                self.spill(&entry).await;
                Ok(())
            }
            CacheWriteStrategy::PositiveFeedbackOnly => {
                let hash = question_hash(&entry.question_text);
                let mut inner = self.inner.write().await;
                inner.pending_feedback.insert(hash, entry);
                Ok(())
            }
        }
    }

    /// Promote a pending entry after the caller reports positive feedback.
    pub async fn record_feedback(&self, question: &str) -> Result<bool, String> {
        if self.strategy != CacheWriteStrategy::PositiveFeedbackOnly {
            return Ok(false);
        }
        let hash = question_hash(question);
        let pending = {
            let mut inner = self.inner.write().await;
            inner.pending_feedback.remove(&hash)
        };
        match pending {
            Some(entry) => {
                self.spill(&entry).await;
                self.upsert(entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Insert or replace by question hash (last writer wins).
    async fn upsert(&self, entry: CacheEntry) -> Result<(), String> {
        let hash = question_hash(&entry.question_text);
        let embedding = self.embedder.embed(&entry.question_text).await;
        let terms = tokenize(&entry.question_text);

        let mut inner = self.inner.write().await;
        let indexed = IndexedEntry {
            entry,
            embedding,
            terms,
        };
        let existing = inner.by_hash.get(&hash).copied();
        match existing {
            Some(idx) => inner.records[idx] = indexed,
            None => {
                inner.records.push(indexed);
                let idx = inner.records.len() - 1;
                inner.by_hash.insert(hash, idx);
            }
        }
        Ok(())
    }

    async fn spill(&self, entry: &CacheEntry) {
        let Some(path) = &self.spill_path else {
            return;
        };
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                println!("[QueryCache] Spill serialization failed: {}", e);
                return;
            }
        };
        let result = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> std::io::Result<()> {
                use std::io::Write;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                writeln!(file, "{}", line)
            }
        })
        .await;
        if let Err(e) = result.map_err(|e| e.to_string()).and_then(|r| r.map_err(|e| e.to_string()))
        {
            println!("[QueryCache] Spill write failed: {}", e);
        }
    }
}

/// Hash used for last-writer-wins cache upserts.
pub fn question_hash(question: &str) -> String {
    let digest = Sha256::digest(question.trim().to_lowercase().as_bytes());
    format!("{:x}", digest)
}

/// Render a cache SQL template. Only the time placeholders and the caller's
/// injected parameters are in scope; anything else fails the render.
pub fn render_cache_sql(
    template: &str,
    injected_parameters: &HashMap<String, Value>,
    now: DateTime<Utc>,
) -> Result<String, String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let mut context = serde_json::Map::new();
    context.insert("date".to_string(), Value::String(now.format("%Y-%m-%d").to_string()));
    context.insert(
        "datetime".to_string(),
        Value::String(now.format("%Y-%m-%d %H:%M:%S").to_string()),
    );
    context.insert("time".to_string(), Value::String(now.format("%H:%M:%S").to_string()));
    context.insert(
        "unix_timestamp".to_string(),
        Value::Number(now.timestamp().into()),
    );
    for (key, value) in injected_parameters {
        context.insert(key.clone(), value.clone());
    }

    env.render_str(template, Value::Object(context))
        .map_err(|e| format!("Template render error: {}", e))
}
