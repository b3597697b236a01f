//! askdb: a multi-agent Text2SQL orchestrator.
//!
//! A natural-language question is rewritten and decomposed, relevant schema
//! documents are retrieved from a hybrid index, SQL is generated, corrected,
//! and executed read-only against the configured engine, and the caller
//! receives a streamed answer with the exact SQL and rows behind it.

pub mod actors;
pub mod agents;
pub mod catalog;
pub mod config;
pub mod demo;
pub mod embeddings;
pub mod json_repair;
pub mod orchestrator;
pub mod prompts;
pub mod protocol;
pub mod router;
pub mod run_state;
pub mod sql_validation;
pub mod stores;
pub mod tool_registry;
pub mod tools;

#[cfg(test)]
pub mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::actors::model_gateway_actor::ModelGatewayActor;
use crate::actors::sql_exec_actor::SqlExecActor;
use crate::catalog::{ColumnValueRecord, EntityDocument};
use crate::config::Text2SqlConfig;
use crate::embeddings::{empty_embedder, init_embedder};
use crate::orchestrator::Orchestrator;
use crate::protocol::{OutboundPayload, UserMessagePayload};
use crate::stores::query_cache::{CacheEntry, QueryCache};
use crate::stores::schema_index::SchemaIndex;
use crate::stores::state_store::StateStore;
use crate::stores::value_index::ValueIndex;

/// A fully wired engine: actors spawned, stores indexed, ready to process
/// user messages.
pub struct Text2SqlEngine {
    orchestrator: Orchestrator,
}

impl Text2SqlEngine {
    /// Validate the configuration, spawn the actors, and build the indices.
    /// `load_embedding_model` pulls the local embedding model; without it
    /// the retrieval layer runs keyword-only.
    pub async fn start(
        config: Text2SqlConfig,
        entities: Vec<EntityDocument>,
        column_values: Vec<ColumnValueRecord>,
        load_embedding_model: bool,
    ) -> Result<Self, String> {
        config.validate()?;

        let embedder = empty_embedder();
        if load_embedding_model {
            init_embedder(&embedder).await?;
        }

        let (gateway_tx, gateway_rx) = mpsc::channel(64);
        let gateway = ModelGatewayActor::new(gateway_rx, config.gateway.clone());
        tokio::spawn(gateway.run());

        let (sql_tx, sql_rx) = mpsc::channel(64);
        let sql_actor = SqlExecActor::new(sql_rx, config.target_engine, &config.connection)?;
        tokio::spawn(sql_actor.run());

        let schema_index = Arc::new(
            SchemaIndex::build(entities, embedder.clone(), &HashSet::new()).await,
        );
        let value_index = Arc::new(ValueIndex::build(column_values, embedder.clone()).await);
        let query_cache = Arc::new(QueryCache::new(
            embedder.clone(),
            config.cache_hit_threshold,
            config.cache_write_strategy,
            config.cache_spill_path.clone(),
        ));
        let state_store = Arc::new(StateStore::new(config.resolved_state_dir()));

        println!(
            "[Engine] Started: engine={}, {} entities, {} column values",
            config.target_engine.display_name(),
            schema_index.len(),
            value_index.len()
        );

        Ok(Self {
            orchestrator: Orchestrator {
                gateway_tx,
                sql_tx,
                schema_index,
                value_index,
                query_cache,
                state_store,
                config: Arc::new(config),
            },
        })
    }

    /// Process one user message. See `Orchestrator::process_user_message`.
    pub fn process_user_message(
        &self,
        thread_id: &str,
        payload: UserMessagePayload,
    ) -> mpsc::Receiver<OutboundPayload> {
        self.orchestrator.process_user_message(thread_id, payload)
    }

    /// Seed the query cache with entries prepared offline.
    pub async fn seed_cache(&self, entries: Vec<CacheEntry>) {
        self.orchestrator.query_cache.seed(entries).await;
    }

    /// Access the underlying orchestrator (tests, embedding hosts).
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}
