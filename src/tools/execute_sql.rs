//! SQL execution tool: validates and runs a single SELECT through the SQL
//! execution actor, exposed to the agents as `execute_sql`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::actors::sql_exec_actor::{execute_query, SqlExecMsg};
use crate::config::TargetEngine;
use crate::protocol::QueryRows;
use crate::sql_validation::validate_select;

/// Input for the execute_sql tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSqlInput {
    #[serde(alias = "query")]
    pub sql: String,
}

/// Output from execute_sql, serialized into the agent thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSqlOutput {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sql_executed: String,
}

/// Executor for the execute_sql tool. Read-only: the validator rejects
/// anything that is not a single SELECT before it reaches the engine.
pub struct ExecuteSqlExecutor {
    sql_tx: mpsc::Sender<SqlExecMsg>,
    engine: TargetEngine,
    row_limit: usize,
}

impl ExecuteSqlExecutor {
    pub fn new(sql_tx: mpsc::Sender<SqlExecMsg>, engine: TargetEngine, row_limit: usize) -> Self {
        Self {
            sql_tx,
            engine,
            row_limit,
        }
    }

    /// Execute the query. The returned rows accompany the serialized output
    /// so the sub-run driver can record the `(sql, rows)` result pair.
    pub async fn execute(
        &self,
        input: ExecuteSqlInput,
    ) -> Result<(ExecuteSqlOutput, Option<QueryRows>), String> {
        let report = validate_select(&input.sql, self.engine);
        if !report.ok {
            return Err(format!(
                "SQL rejected by validator: {}",
                report.errors.join("; ")
            ));
        }

        match execute_query(&self.sql_tx, &input.sql, self.row_limit).await {
            Ok(rows) => {
                let output = ExecuteSqlOutput {
                    success: true,
                    columns: rows.columns.clone(),
                    rows: rows.rows.clone(),
                    row_count: rows.row_count(),
                    truncated: rows.truncated,
                    error: None,
                    sql_executed: input.sql,
                };
                Ok((output, Some(rows)))
            }
            Err(e) => {
                let output = ExecuteSqlOutput {
                    success: false,
                    columns: vec![],
                    rows: vec![],
                    row_count: 0,
                    truncated: false,
                    error: Some(e),
                    sql_executed: input.sql,
                };
                Ok((output, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::sql_exec_actor::SqlExecActor;
    use crate::config::ConnectionConfig;
    use rusqlite::Connection;

    fn sqlite_executor(row_limit: usize) -> (tempfile::TempDir, ExecuteSqlExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("t.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE orders (id INTEGER, total REAL)", [])
                .unwrap();
            conn.execute("INSERT INTO orders VALUES (1, 10.5), (2, 20.0)", [])
                .unwrap();
        }
        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());
        (
            dir,
            ExecuteSqlExecutor::new(tx, TargetEngine::Sqlite, row_limit),
        )
    }

    #[tokio::test]
    async fn test_select_executes() {
        let (_dir, executor) = sqlite_executor(100);
        let (output, rows) = executor
            .execute(ExecuteSqlInput {
                sql: "SELECT id, total FROM orders ORDER BY id".to_string(),
            })
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.row_count, 2);
        assert!(rows.is_some());
    }

    #[tokio::test]
    async fn test_write_statement_rejected_before_execution() {
        let (_dir, executor) = sqlite_executor(100);
        let err = executor
            .execute(ExecuteSqlInput {
                sql: "DELETE FROM orders".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.contains("validator"));
    }

    #[tokio::test]
    async fn test_runtime_error_reported_in_output() {
        let (_dir, executor) = sqlite_executor(100);
        let (output, rows) = executor
            .execute(ExecuteSqlInput {
                sql: "SELECT missing_column FROM orders".to_string(),
            })
            .await
            .unwrap();
        assert!(!output.success);
        assert!(output.error.is_some());
        assert!(rows.is_none());
    }

    #[test]
    fn test_query_alias_accepted() {
        let input: ExecuteSqlInput =
            serde_json::from_str(r#"{"query": "SELECT 1"}"#).unwrap();
        assert_eq!(input.sql, "SELECT 1");
    }
}
