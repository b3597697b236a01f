//! State store: versioned per-thread snapshots of suspended runs.
//!
//! One JSON file per thread id under the state directory. Writes for the
//! same thread are serialized through a per-thread lock; a version mismatch
//! on load invalidates the snapshot so the run restarts cleanly instead of
//! mis-routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::run_state::Run;

/// Bump when the serialized `Run` layout changes incompatibly.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRun {
    version: u32,
    thread_id: String,
    run: Run,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// File-backed store of suspended runs keyed by thread id.
pub struct StateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Persist a suspended run. Existing snapshots for the thread are
    /// replaced; their `created_at` is preserved.
    pub async fn save(&self, run: &Run) -> Result<(), String> {
        let lock = self.thread_lock(&run.thread_id).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| format!("Failed to create state dir: {}", e))?;

        let path = self.path_for(&run.thread_id);
        let created_at = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<PersistedRun>(&raw)
                .map(|p| p.created_at)
                .unwrap_or_else(|_| Utc::now()),
            Err(_) => Utc::now(),
        };

        let persisted = PersistedRun {
            version: STATE_VERSION,
            thread_id: run.thread_id.clone(),
            run: run.clone(),
            created_at,
            updated_at: Utc::now(),
        };

        let raw = serde_json::to_string_pretty(&persisted)
            .map_err(|e| format!("Failed to serialize run state: {}", e))?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| format!("Failed to write run state {}: {}", path.display(), e))?;

        println!("[StateStore] Saved thread {}", run.thread_id);
        Ok(())
    }

    /// Load a suspended run. Returns `None` when there is no snapshot, the
    /// snapshot cannot be parsed, or its version does not match; stale
    /// snapshots are removed so the run restarts instead of mis-routing.
    pub async fn load(&self, thread_id: &str) -> Option<Run> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let path = self.path_for(thread_id);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str::<PersistedRun>(&raw) {
            Ok(persisted) if persisted.version == STATE_VERSION => Some(persisted.run),
            Ok(persisted) => {
                println!(
                    "[StateStore] Version mismatch for thread {} (found v{}, expected v{}), discarding",
                    thread_id, persisted.version, STATE_VERSION
                );
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
            Err(e) => {
                println!(
                    "[StateStore] Unreadable snapshot for thread {}: {}, discarding",
                    thread_id, e
                );
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
        }
    }

    /// Remove the snapshot after the run completes.
    pub async fn clear(&self, thread_id: &str) {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;
        let path = self.path_for(thread_id);
        let _ = tokio::fs::remove_file(&path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_state::{SubQuestion, SubQuestionStatus};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (_dir, store) = store();
        let mut run = Run::new("thread-1", "show sales by region");
        let mut sq = SubQuestion::new("show sales by region", 0, run.id);
        sq.status = SubQuestionStatus::AwaitingClarification;
        run.rounds.push(vec![sq]);

        store.save(&run).await.unwrap();
        let restored = store.load("thread-1").await.expect("snapshot should load");
        assert_eq!(restored.user_message, "show sales by region");
        assert_eq!(
            restored.rounds[0][0].status,
            SubQuestionStatus::AwaitingClarification
        );
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let (_dir, store) = store();
        assert!(store.load("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_discards() {
        let (_dir, store) = store();
        let run = Run::new("thread-2", "q");
        store.save(&run).await.unwrap();

        // Corrupt the version on disk
        let path = store.path_for("thread-2");
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        value["version"] = serde_json::json!(999);
        tokio::fs::write(&path, value.to_string()).await.unwrap();

        assert!(store.load("thread-2").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_removes_snapshot() {
        let (_dir, store) = store();
        let run = Run::new("thread-3", "q");
        store.save(&run).await.unwrap();
        store.clear("thread-3").await;
        assert!(store.load("thread-3").await.is_none());
    }

    #[tokio::test]
    async fn test_thread_id_sanitized() {
        let (_dir, store) = store();
        let run = Run::new("weird/../id", "q");
        store.save(&run).await.unwrap();
        assert!(store.load("weird/../id").await.is_some());
    }
}
