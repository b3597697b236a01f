//! askdb command line: ask questions against a configured warehouse or the
//! embedded demo database, streaming payloads as JSON lines.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use askdb::catalog::{ColumnValueRecord, EntityDocument};
use askdb::config::{TargetEngine, Text2SqlConfig};
use askdb::demo;
use askdb::protocol::UserMessagePayload;
use askdb::stores::schema_index::load_entities_from_json;
use askdb::stores::value_index::load_values_from_jsonl;
use askdb::Text2SqlEngine;

#[derive(Parser)]
#[command(name = "askdb", version, about = "Multi-agent Text2SQL orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question against the configured warehouse.
    Ask {
        /// The natural-language question.
        question: String,
        /// Path to the JSON configuration file.
        #[arg(long, env = "ASKDB_CONFIG")]
        config: PathBuf,
        /// Conversation thread id (resumes suspended runs).
        #[arg(long, default_value = "cli")]
        thread_id: String,
        /// Load the local embedding model for hybrid retrieval.
        #[arg(long)]
        embeddings: bool,
    },
    /// Ask a question against the embedded demo warehouse.
    Demo {
        /// The natural-language question.
        question: String,
        /// Where to place the demo SQLite database.
        #[arg(long, default_value = "demo.db")]
        db_path: PathBuf,
        /// OpenAI-compatible gateway base URL.
        #[arg(long, env = "ASKDB_GATEWAY_URL", default_value = "http://127.0.0.1:11434")]
        gateway_url: String,
        /// Gateway model name.
        #[arg(long, env = "ASKDB_MODEL", default_value = "gpt-4.1-mini")]
        model: String,
        /// Gateway API key.
        #[arg(long, env = "ASKDB_API_KEY")]
        api_key: Option<String>,
        /// Conversation thread id (resumes suspended runs).
        #[arg(long, default_value = "demo")]
        thread_id: String,
    },
    /// Create and populate the demo SQLite database, then exit.
    SeedDemo {
        #[arg(long, default_value = "demo.db")]
        db_path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask {
            question,
            config,
            thread_id,
            embeddings,
        } => run_ask(question, config, thread_id, embeddings).await,
        Command::Demo {
            question,
            db_path,
            gateway_url,
            model,
            api_key,
            thread_id,
        } => run_demo(question, db_path, gateway_url, model, api_key, thread_id).await,
        Command::SeedDemo { db_path } => demo::seed_demo_database(&db_path).map(|orders| {
            println!("Seeded {} with {} orders", db_path.display(), orders);
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_ask(
    question: String,
    config_path: PathBuf,
    thread_id: String,
    embeddings: bool,
) -> Result<(), String> {
    let config = Text2SqlConfig::load(&config_path).await?;

    let entities: Vec<EntityDocument> = match &config.schema_store_path {
        Some(path) => load_entities_from_json(path).await?,
        None => return Err("config is missing schema_store_path".to_string()),
    };
    let column_values: Vec<ColumnValueRecord> = match &config.column_value_store_path {
        Some(path) => load_values_from_jsonl(path).await?,
        None => Vec::new(),
    };

    let engine = Text2SqlEngine::start(config, entities, column_values, embeddings).await?;
    stream_question(&engine, &thread_id, &question).await
}

async fn run_demo(
    question: String,
    db_path: PathBuf,
    gateway_url: String,
    model: String,
    api_key: Option<String>,
    thread_id: String,
) -> Result<(), String> {
    demo::seed_demo_database(&db_path)?;

    let mut config = Text2SqlConfig::default();
    config.use_case = "the AdventureWorks demo sales warehouse".to_string();
    config.target_engine = TargetEngine::Sqlite;
    config.connection.sqlite_path = Some(db_path);
    config.gateway.base_url = gateway_url;
    config.gateway.model = model;
    config.gateway.api_key = api_key;

    let engine = Text2SqlEngine::start(
        config,
        demo::demo_entities(),
        demo::demo_column_values(),
        false,
    )
    .await?;
    stream_question(&engine, &thread_id, &question).await
}

async fn stream_question(
    engine: &Text2SqlEngine,
    thread_id: &str,
    question: &str,
) -> Result<(), String> {
    let payload = UserMessagePayload {
        user_message: question.to_string(),
        chat_history: Vec::new(),
        injected_parameters: Default::default(),
    };

    let mut rx = engine.process_user_message(thread_id, payload);
    while let Some(outbound) = rx.recv().await {
        let line = serde_json::to_string(&outbound)
            .map_err(|e| format!("Failed to serialize payload: {}", e))?;
        println!("{}", line);
    }
    Ok(())
}
