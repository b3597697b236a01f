//! Run-state model: one `Run` per user message, owning its decomposition
//! rounds, sub-question threads, and messages.
//!
//! Everything here is serde-serializable so a suspended run (awaiting a
//! disambiguation reply) can round-trip through the state store without
//! changing what the router would decide next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::catalog::EntityDocument;
use crate::protocol::{DisambiguationQuestion, QueryRows, TokenUsage, Turn};

// ============ Agents ============

/// The agents a run can route between. `User` marks caller messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    User,
    QueryRewrite,
    Cache,
    SchemaSelection,
    Disambiguation,
    SqlGeneration,
    SqlCorrection,
    Answer,
}

impl AgentId {
    pub fn name(&self) -> &'static str {
        match self {
            AgentId::User => "user",
            AgentId::QueryRewrite => "query_rewrite",
            AgentId::Cache => "cache",
            AgentId::SchemaSelection => "schema_selection",
            AgentId::Disambiguation => "disambiguation",
            AgentId::SqlGeneration => "sql_generation",
            AgentId::SqlCorrection => "sql_correction",
            AgentId::Answer => "answer",
        }
    }
}

// ============ Messages ============

/// One message appended to an agent thread. Threads are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub source: AgentId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(source: AgentId, content: impl Into<String>) -> Self {
        Self {
            source,
            content: content.into(),
            token_usage: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }
}

// ============ Sub-questions ============

/// Lifecycle status of a sub-question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubQuestionStatus {
    Pending,
    Running,
    AwaitingClarification,
    Succeeded,
    Failed,
}

/// What kind of cache hit a sub-question saw, if any.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitKind {
    WithPreRun,
    NoPreRun,
}

/// A cache candidate carried into generation/correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheCandidate {
    pub sql: String,
    pub kind: CacheHitKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_run_rows: Option<QueryRows>,
}

/// Routing flags maintained by the sub-run driver; the router reads them
/// but never mutates anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubRunFlags {
    /// Set after the cache step: `None` until checked, `Some(None)` on miss.
    #[serde(default)]
    pub cache_checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<CacheHitKind>,
    #[serde(default)]
    pub ambiguity_detected: bool,
    #[serde(default)]
    pub disambiguation_resolved: bool,
    #[serde(default)]
    pub sql_generated: bool,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub correction_needed: bool,
}

/// One atomic natural-language question produced by decomposition.
/// Owns its agent thread; nothing is shared across sub-questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: Uuid,
    pub text: String,
    pub round_index: usize,
    pub parent_id: Uuid,
    pub status: SubQuestionStatus,
    #[serde(default)]
    pub thread: Vec<AgentMessage>,
    #[serde(default)]
    pub flags: SubRunFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_schemas: Vec<EntityDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_candidate: Option<CacheCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_disambiguation: Vec<DisambiguationQuestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_reply: Option<String>,
    /// Mapping JSON from a clear disambiguation pass, fed to generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_mapping: Option<String>,
    /// SQL produced by generation, awaiting correction/execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_rows: Option<QueryRows>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubQuestion {
    pub fn new(text: impl Into<String>, round_index: usize, parent_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            round_index,
            parent_id,
            status: SubQuestionStatus::Pending,
            thread: Vec::new(),
            flags: SubRunFlags::default(),
            selected_schemas: Vec::new(),
            cache_candidate: None,
            pending_disambiguation: Vec::new(),
            clarification_reply: None,
            resolved_mapping: None,
            candidate_sql: None,
            resolved_sql: None,
            resolved_rows: None,
            error: None,
        }
    }

    pub fn push_message(&mut self, message: AgentMessage) {
        self.thread.push(message);
    }

    pub fn message_count(&self) -> usize {
        self.thread.len()
    }

    pub fn last_message(&self) -> Option<&AgentMessage> {
        self.thread.last()
    }

    /// Merge entity documents retrieved by schema selection, deduplicated
    /// by FQN.
    pub fn merge_schemas(&mut self, entities: Vec<EntityDocument>) {
        for entity in entities {
            if !self
                .selected_schemas
                .iter()
                .any(|e| e.fqn.eq_ignore_ascii_case(&entity.fqn))
            {
                self.selected_schemas.push(entity);
            }
        }
    }
}

// ============ Runs ============

/// Why a run (or sub-run) stopped routing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    TerminateToken,
    AnswerAndSourcesPresent,
    MaxMessages,
    UnrecoverableError,
}

/// The outcome of query-rewrite decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    /// Rounds of sub-question texts; later rounds may depend on earlier ones.
    pub rounds: Vec<Vec<String>>,
    pub combination_logic: String,
}

/// The full lifecycle state of one user message, including resumptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub thread_id: String,
    pub user_message: String,
    #[serde(default)]
    pub chat_history: Vec<Turn>,
    #[serde(default)]
    pub injected_parameters: HashMap<String, serde_json::Value>,
    /// Messages at the run level (caller message, query-rewrite output).
    #[serde(default)]
    pub run_thread: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination_logic: Option<String>,
    /// Decomposition rounds; populated after query rewrite.
    #[serde(default)]
    pub rounds: Vec<Vec<SubQuestion>>,
    /// Index of the round currently executing (or to resume at).
    #[serde(default)]
    pub current_round: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    /// Captured once at run start; the `current_datetime` tool returns this
    /// for the whole run.
    pub started_at: DateTime<Utc>,
}

impl Run {
    pub fn new(thread_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();
        let mut run = Self {
            id: Uuid::new_v4(),
            thread_id: thread_id.into(),
            user_message: user_message.clone(),
            chat_history: Vec::new(),
            injected_parameters: HashMap::new(),
            run_thread: Vec::new(),
            combination_logic: None,
            rounds: Vec::new(),
            current_round: 0,
            termination_reason: None,
            started_at: Utc::now(),
        };
        run.run_thread
            .push(AgentMessage::new(AgentId::User, user_message));
        run
    }

    /// Total messages across the run thread and every sub-question thread.
    pub fn message_count(&self) -> usize {
        self.run_thread.len()
            + self
                .rounds
                .iter()
                .flatten()
                .map(|sq| sq.message_count())
                .sum::<usize>()
    }

    /// Sub-questions currently waiting on a caller clarification.
    pub fn awaiting_clarification(&mut self) -> Vec<&mut SubQuestion> {
        self.rounds
            .iter_mut()
            .flatten()
            .filter(|sq| sq.status == SubQuestionStatus::AwaitingClarification)
            .collect()
    }

    /// All `(sql, rows)` results in round + index order, for the answer
    /// agent and for cross-round dependency injection.
    pub fn completed_results(&self) -> Vec<&SubQuestion> {
        self.rounds
            .iter()
            .flatten()
            .filter(|sq| sq.status == SubQuestionStatus::Succeeded || sq.error.is_some())
            .collect()
    }
}
