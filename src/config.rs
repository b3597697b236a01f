use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

// ============ Target Engines ============

/// Supported SQL engines. Selects the dialect for validation, the prompt
/// rules appended to generation/correction, and the connector used for
/// execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetEngine {
    Tsql,
    Postgres,
    Snowflake,
    Databricks,
    Sqlite,
}

impl Default for TargetEngine {
    fn default() -> Self {
        TargetEngine::Sqlite
    }
}

impl TargetEngine {
    pub fn display_name(&self) -> &'static str {
        match self {
            TargetEngine::Tsql => "TSQL",
            TargetEngine::Postgres => "PostgreSQL",
            TargetEngine::Snowflake => "Snowflake",
            TargetEngine::Databricks => "Databricks",
            TargetEngine::Sqlite => "SQLite",
        }
    }

    /// Whether the engine limits rows with `TOP n` instead of `LIMIT n`.
    pub fn uses_top(&self) -> bool {
        matches!(self, TargetEngine::Tsql)
    }
}

// ============ Connection Parameters ============

/// Connection settings for the configured engine. Only the fields relevant
/// to `target_engine` are consulted; the rest may stay empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// SQLite database file path.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// PostgreSQL connection string (`host=... user=... dbname=...`).
    #[serde(default)]
    pub postgres_connection_string: Option<String>,
    /// Snowflake account identifier (`myorg-myaccount`).
    #[serde(default)]
    pub snowflake_account: Option<String>,
    #[serde(default)]
    pub snowflake_user: Option<String>,
    #[serde(default)]
    pub snowflake_token: Option<String>,
    #[serde(default)]
    pub snowflake_warehouse: Option<String>,
    #[serde(default)]
    pub snowflake_database: Option<String>,
    #[serde(default)]
    pub snowflake_schema: Option<String>,
    /// Databricks workspace URL (`https://adb-....azuredatabricks.net`).
    #[serde(default)]
    pub databricks_host: Option<String>,
    #[serde(default)]
    pub databricks_http_path: Option<String>,
    #[serde(default)]
    pub databricks_warehouse_id: Option<String>,
    #[serde(default)]
    pub databricks_token: Option<String>,
    /// HTTP SQL gateway for engines without an in-process driver (TSQL).
    #[serde(default)]
    pub sql_gateway_url: Option<String>,
}

// ============ Gateway / Embedding Settings ============

fn default_gateway_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model_name() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

/// Model gateway settings (OpenAI-compatible chat completions endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            api_key: None,
            model: default_model_name(),
            temperature: default_temperature(),
        }
    }
}

// ============ Cache Write Strategy ============

/// When successful generations are written back to the query cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheWriteStrategy {
    /// Write on every successful run (default).
    Always,
    Never,
    /// Write only when the caller later reports positive feedback.
    PositiveFeedbackOnly,
    /// Append to the JSONL spill for offline indexing; live index untouched.
    OfflineBatch,
}

impl Default for CacheWriteStrategy {
    fn default() -> Self {
        CacheWriteStrategy::Always
    }
}

// ============ Defaults ============

fn default_use_case() -> String {
    "a corporate analytics warehouse".to_string()
}

fn default_row_limit() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_cache_hit_threshold() -> f32 {
    0.85
}

fn default_max_messages() -> usize {
    20
}

fn default_max_parallel_subquestions() -> usize {
    4
}

fn default_run_timeout_seconds() -> u64 {
    300
}

fn default_tool_timeout_seconds() -> u64 {
    60
}

fn default_max_correction_attempts() -> usize {
    5
}

fn default_generation_validation_retries() -> usize {
    2
}

/// Row cap no generated query may exceed, regardless of configuration.
pub const HARD_ROW_CAP: usize = 10_000;

// ============ Top-level Configuration ============

/// Process-wide orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Text2SqlConfig {
    /// Short description of the deployment's domain, substituted into every
    /// agent prompt as `use_case`.
    #[serde(default = "default_use_case")]
    pub use_case: String,
    #[serde(default)]
    pub target_engine: TargetEngine,
    /// Free-text prompt fragment appended to generation/correction prompts
    /// in addition to the built-in rules for the engine.
    #[serde(default)]
    pub engine_specific_rules: String,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    #[serde(default = "default_true")]
    pub use_query_cache: bool,
    #[serde(default)]
    pub pre_run_query_cache: bool,
    #[serde(default = "default_true")]
    pub use_column_value_store: bool,
    #[serde(default)]
    pub generate_follow_up_suggestions: bool,
    #[serde(default = "default_cache_hit_threshold")]
    pub cache_hit_threshold: f32,
    #[serde(default)]
    pub cache_write_strategy: CacheWriteStrategy,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_parallel_subquestions")]
    pub max_parallel_subquestions: usize,
    #[serde(default = "default_run_timeout_seconds")]
    pub run_timeout_seconds: u64,
    #[serde(default = "default_tool_timeout_seconds")]
    pub tool_timeout_seconds: u64,
    #[serde(default = "default_max_correction_attempts")]
    pub max_correction_attempts: usize,
    #[serde(default = "default_generation_validation_retries")]
    pub generation_validation_retries: usize,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// JSON file holding the entity documents (array of schema documents).
    #[serde(default)]
    pub schema_store_path: Option<PathBuf>,
    /// JSON Lines file holding the column-value records.
    #[serde(default)]
    pub column_value_store_path: Option<PathBuf>,
    /// Directory for suspended-run snapshots; defaults under the user data
    /// dir when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Optional JSONL spill file for cache writes.
    #[serde(default)]
    pub cache_spill_path: Option<PathBuf>,
    #[serde(default)]
    pub verbose_logging: bool,
    /// Extra template parameters made available to cache SQL templates for
    /// every request (merged under the request's injected parameters).
    #[serde(default)]
    pub default_injected_parameters: HashMap<String, serde_json::Value>,
}

impl Default for Text2SqlConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config must deserialize")
    }
}

impl Text2SqlConfig {
    /// Load configuration from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config: Text2SqlConfig = serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working run.
    pub fn validate(&self) -> Result<(), String> {
        if self.row_limit == 0 {
            return Err("row_limit must be at least 1".to_string());
        }
        if self.row_limit > HARD_ROW_CAP {
            return Err(format!(
                "row_limit {} exceeds the hard cap of {}",
                self.row_limit, HARD_ROW_CAP
            ));
        }
        if self.max_messages == 0 {
            return Err("max_messages must be at least 1".to_string());
        }
        if self.max_parallel_subquestions == 0 {
            return Err("max_parallel_subquestions must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.cache_hit_threshold) {
            return Err(format!(
                "cache_hit_threshold must be in [0, 1], got {}",
                self.cache_hit_threshold
            ));
        }
        if self.run_timeout_seconds == 0 || self.tool_timeout_seconds == 0 {
            return Err("timeouts must be non-zero".to_string());
        }
        Ok(())
    }

    /// Directory for suspended-run snapshots.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("askdb")
            .join("state")
    }
}
