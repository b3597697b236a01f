//! SQL execution actor: runs a single SELECT against the configured engine
//! with a row cap, and answers connection health checks.
//!
//! Engine support:
//! - SQLite: embedded via rusqlite on the blocking pool
//! - PostgreSQL: tokio-postgres simple-query protocol (values arrive as
//!   text and are coerced back to numbers where they parse)
//! - Snowflake / Databricks: their REST SQL statement APIs
//! - TSQL: an HTTP SQL-gateway sidecar speaking `{sql} -> {columns, rows}`

use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::{ConnectionConfig, TargetEngine, HARD_ROW_CAP};
use crate::protocol::QueryRows;

/// Messages for the SQL execution actor.
#[derive(Debug)]
pub enum SqlExecMsg {
    /// Execute a single SELECT with a row cap.
    Execute {
        sql: String,
        row_limit: usize,
        respond_to: oneshot::Sender<Result<QueryRows, String>>,
    },
    /// Enumerate the queryable tables/views visible to the connection.
    ListEntities {
        respond_to: oneshot::Sender<Result<Vec<String>, String>>,
    },
    /// Describe one entity's columns: name and data type rows from the
    /// engine catalog.
    DescribeEntity {
        entity: String,
        respond_to: oneshot::Sender<Result<QueryRows, String>>,
    },
    /// Cheap connectivity probe (`SELECT 1`).
    TestConnection {
        respond_to: oneshot::Sender<Result<(), String>>,
    },
}

/// Engine-specific connection state.
#[derive(Debug)]
enum EngineConnection {
    Sqlite {
        db_path: PathBuf,
    },
    Postgres {
        connection_string: String,
        client: Mutex<Option<tokio_postgres::Client>>,
    },
    Snowflake {
        http: reqwest::Client,
        account: String,
        token: String,
        warehouse: Option<String>,
        database: Option<String>,
        schema: Option<String>,
    },
    Databricks {
        http: reqwest::Client,
        host: String,
        warehouse_id: String,
        token: String,
    },
    Gateway {
        http: reqwest::Client,
        url: String,
    },
}

/// SQL execution actor.
#[derive(Debug)]
pub struct SqlExecActor {
    rx: mpsc::Receiver<SqlExecMsg>,
    engine: TargetEngine,
    connection: EngineConnection,
}

impl SqlExecActor {
    /// Build the actor from the engine selection and connection parameters.
    pub fn new(
        rx: mpsc::Receiver<SqlExecMsg>,
        engine: TargetEngine,
        config: &ConnectionConfig,
    ) -> Result<Self, String> {
        let connection = match engine {
            TargetEngine::Sqlite => EngineConnection::Sqlite {
                db_path: config
                    .sqlite_path
                    .clone()
                    .ok_or("SQLite engine requires connection.sqlite_path")?,
            },
            TargetEngine::Postgres => EngineConnection::Postgres {
                connection_string: config
                    .postgres_connection_string
                    .clone()
                    .ok_or("PostgreSQL engine requires connection.postgres_connection_string")?,
                client: Mutex::new(None),
            },
            TargetEngine::Snowflake => EngineConnection::Snowflake {
                http: reqwest::Client::new(),
                account: config
                    .snowflake_account
                    .clone()
                    .ok_or("Snowflake engine requires connection.snowflake_account")?,
                token: config
                    .snowflake_token
                    .clone()
                    .ok_or("Snowflake engine requires connection.snowflake_token")?,
                warehouse: config.snowflake_warehouse.clone(),
                database: config.snowflake_database.clone(),
                schema: config.snowflake_schema.clone(),
            },
            TargetEngine::Databricks => EngineConnection::Databricks {
                http: reqwest::Client::new(),
                host: config
                    .databricks_host
                    .clone()
                    .ok_or("Databricks engine requires connection.databricks_host")?,
                warehouse_id: config
                    .databricks_warehouse_id
                    .clone()
                    .ok_or("Databricks engine requires connection.databricks_warehouse_id")?,
                token: config
                    .databricks_token
                    .clone()
                    .ok_or("Databricks engine requires connection.databricks_token")?,
            },
            TargetEngine::Tsql => EngineConnection::Gateway {
                http: reqwest::Client::new(),
                url: config
                    .sql_gateway_url
                    .clone()
                    .ok_or("TSQL engine requires connection.sql_gateway_url")?,
            },
        };

        Ok(Self {
            rx,
            engine,
            connection,
        })
    }

    /// Run the actor's message loop. Execution is sequential per actor; the
    /// orchestrator bounds concurrency upstream.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                SqlExecMsg::Execute {
                    sql,
                    row_limit,
                    respond_to,
                } => {
                    let result = self.execute(&sql, row_limit).await;
                    let _ = respond_to.send(result);
                }
                SqlExecMsg::ListEntities { respond_to } => {
                    let result = self.list_entities().await;
                    let _ = respond_to.send(result);
                }
                SqlExecMsg::DescribeEntity { entity, respond_to } => {
                    let result = self.describe_entity(&entity).await;
                    let _ = respond_to.send(result);
                }
                SqlExecMsg::TestConnection { respond_to } => {
                    let result = self.execute("SELECT 1", 1).await.map(|_| ());
                    let _ = respond_to.send(result);
                }
            }
        }

        println!("[SqlExec] Stopped");
    }

    async fn execute(&self, sql: &str, row_limit: usize) -> Result<QueryRows, String> {
        if sql.trim().is_empty() {
            return Err("SQL query cannot be empty".to_string());
        }

        let cap = row_limit.clamp(1, HARD_ROW_CAP);
        let limited_sql = apply_row_limit(sql, cap, self.engine);
        println!(
            "[SqlExec] Executing on {}: {}",
            self.engine.display_name(),
            truncate_sql(&limited_sql, 120)
        );

        let mut result = match &self.connection {
            EngineConnection::Sqlite { db_path } => {
                let db_path = db_path.clone();
                let sql_owned = limited_sql.clone();
                tokio::task::spawn_blocking(move || execute_sqlite(&db_path, &sql_owned))
                    .await
                    .map_err(|e| format!("SQL execution task panicked: {}", e))?
            }
            EngineConnection::Postgres {
                connection_string,
                client,
            } => execute_postgres(connection_string, client, &limited_sql).await,
            EngineConnection::Snowflake {
                http,
                account,
                token,
                warehouse,
                database,
                schema,
            } => {
                execute_snowflake(
                    http,
                    account,
                    token,
                    warehouse.as_deref(),
                    database.as_deref(),
                    schema.as_deref(),
                    &limited_sql,
                )
                .await
            }
            EngineConnection::Databricks {
                http,
                host,
                warehouse_id,
                token,
            } => execute_databricks(http, host, warehouse_id, token, &limited_sql).await,
            EngineConnection::Gateway { http, url } => {
                execute_gateway(http, url, &limited_sql).await
            }
        }?;

        if result.rows.len() > cap {
            result.rows.truncate(cap);
            result.truncated = true;
        } else if result.rows.len() == cap {
            result.truncated = true;
        }

        println!("[SqlExec] {} rows returned", result.rows.len());
        Ok(result)
    }

    /// Enumerate tables via the engine's catalog. Catalog queries reuse the
    /// ordinary execute path.
    async fn list_entities(&self) -> Result<Vec<String>, String> {
        let catalog_sql = match self.engine {
            TargetEngine::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            TargetEngine::Postgres => {
                "SELECT table_schema || '.' || table_name FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                 ORDER BY 1"
            }
            TargetEngine::Tsql => {
                "SELECT TABLE_SCHEMA + '.' + TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 ORDER BY 1"
            }
            TargetEngine::Snowflake | TargetEngine::Databricks => {
                "SELECT table_schema || '.' || table_name FROM information_schema.tables \
                 ORDER BY 1"
            }
        };

        let rows = self.execute(catalog_sql, HARD_ROW_CAP).await?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first())
            .filter_map(|v| v.as_str().map(String::from))
            .collect())
    }

    /// Describe one entity's columns via the engine's catalog.
    async fn describe_entity(&self, entity: &str) -> Result<QueryRows, String> {
        let safe = entity.replace('\'', "''");
        let describe_sql = match self.engine {
            TargetEngine::Sqlite => {
                // PRAGMA table_info is not a SELECT; go through the
                // table-valued form.
                format!(
                    "SELECT name, type FROM pragma_table_info('{}')",
                    safe
                )
            }
            _ => {
                let (schema_part, table_part) = match safe.rsplit_once('.') {
                    Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
                    None => (None, safe.clone()),
                };
                let mut sql = format!(
                    "SELECT column_name, data_type FROM information_schema.columns \
                     WHERE table_name = '{}'",
                    table_part
                );
                if let Some(schema) = schema_part {
                    sql.push_str(&format!(" AND table_schema = '{}'", schema));
                }
                sql.push_str(" ORDER BY ordinal_position");
                sql
            }
        };

        self.execute(&describe_sql, HARD_ROW_CAP).await
    }
}

// ========== Row Limiting ==========

/// Apply the engine's row-limiting clause when the query has none.
/// TSQL uses `SELECT TOP (n)`; every other supported engine uses `LIMIT n`.
pub fn apply_row_limit(sql: &str, max_rows: usize, engine: TargetEngine) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") {
        return trimmed.to_string();
    }

    if engine.uses_top() {
        if upper.contains(" TOP ") || upper.starts_with("SELECT TOP") {
            return trimmed.to_string();
        }
        let rest = &trimmed["SELECT".len()..];
        if rest.trim_start().to_uppercase().starts_with("DISTINCT") {
            let after = rest.trim_start();
            let distinct_len = "DISTINCT".len();
            return format!(
                "SELECT DISTINCT TOP ({}){}",
                max_rows,
                &after[distinct_len..]
            );
        }
        return format!("SELECT TOP ({}){}", max_rows, rest);
    }

    if upper.contains("LIMIT") {
        return trimmed.to_string();
    }

    format!("{} LIMIT {}", trimmed, max_rows)
}

fn truncate_sql(sql: &str, max_len: usize) -> String {
    let normalized: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.len() > max_len {
        format!("{}...", &normalized[..max_len])
    } else {
        normalized
    }
}

// ========== SQLite ==========

fn execute_sqlite(db_path: &PathBuf, sql: &str) -> Result<QueryRows, String> {
    let conn = Connection::open(db_path)
        .map_err(|e| format!("Failed to open database: {}", e))?;

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| format!("Failed to prepare SQL: {}", e))?;

    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = stmt.column_count();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut rows_iter = stmt
        .query([])
        .map_err(|e| format!("Failed to execute SQL: {}", e))?;

    while let Some(row) = rows_iter
        .next()
        .map_err(|e| format!("Failed to fetch row: {}", e))?
    {
        let mut row_values: Vec<Value> = Vec::with_capacity(column_count);
        for i in 0..column_count {
            row_values.push(sqlite_value_to_json(row, i));
        }
        rows.push(row_values);
    }

    Ok(QueryRows {
        columns,
        rows,
        truncated: false,
    })
}

fn sqlite_value_to_json(row: &rusqlite::Row, idx: usize) -> Value {
    use rusqlite::types::ValueRef;
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Number(i.into()),
        Ok(ValueRef::Real(f)) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ok(ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).to_string()),
        Ok(ValueRef::Blob(_)) => Value::String("<blob>".to_string()),
        Err(_) => Value::Null,
    }
}

// ========== PostgreSQL ==========

async fn execute_postgres(
    connection_string: &str,
    client_slot: &Mutex<Option<tokio_postgres::Client>>,
    sql: &str,
) -> Result<QueryRows, String> {
    let mut slot = client_slot.lock().await;

    if slot.as_ref().map(|c| c.is_closed()).unwrap_or(true) {
        let (client, connection) =
            tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                println!("[SqlExec] PostgreSQL connection error: {}", e);
            }
        });
        *slot = Some(client);
    }

    let client = slot.as_ref().expect("client populated above");
    let messages = client
        .simple_query(sql)
        .await
        .map_err(|e| format!("PostgreSQL query failed: {}", e))?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<Value>> = Vec::new();

    for message in messages {
        if let tokio_postgres::SimpleQueryMessage::Row(row) = message {
            if columns.is_empty() {
                columns = row
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
            }
            let mut row_values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                row_values.push(coerce_text_value(row.get(i)));
            }
            rows.push(row_values);
        }
    }

    Ok(QueryRows {
        columns,
        rows,
        truncated: false,
    })
}

/// Simple-query values arrive as text; coerce numerics and booleans back.
fn coerce_text_value(raw: Option<&str>) -> Value {
    let Some(text) = raw else {
        return Value::Null;
    };
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match text {
        "t" | "true" => Value::Bool(true),
        "f" | "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

// ========== Snowflake ==========

async fn execute_snowflake(
    http: &reqwest::Client,
    account: &str,
    token: &str,
    warehouse: Option<&str>,
    database: Option<&str>,
    schema: Option<&str>,
    sql: &str,
) -> Result<QueryRows, String> {
    let url = format!(
        "https://{}.snowflakecomputing.com/api/v2/statements",
        account
    );

    let mut body = json!({
        "statement": sql,
        "timeout": 60,
    });
    if let Some(warehouse) = warehouse {
        body["warehouse"] = json!(warehouse);
    }
    if let Some(database) = database {
        body["database"] = json!(database);
    }
    if let Some(schema) = schema {
        body["schema"] = json!(schema);
    }

    let response = http
        .post(&url)
        .bearer_auth(token)
        .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
        .header("Accept", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Snowflake request failed: {}", e))?;

    let status = response.status();
    let parsed: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse Snowflake response: {}", e))?;

    if !status.is_success() {
        let message = parsed["message"].as_str().unwrap_or("unknown error");
        return Err(format!("Snowflake returned {}: {}", status, message));
    }

    let columns: Vec<String> = parsed["resultSetMetaData"]["rowType"]
        .as_array()
        .map(|row_type| {
            row_type
                .iter()
                .filter_map(|c| c["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Vec<Value>> = parsed["data"]
        .as_array()
        .map(|data| {
            data.iter()
                .filter_map(|row| row.as_array())
                .map(|row| {
                    row.iter()
                        .map(|v| coerce_text_value(v.as_str()))
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(QueryRows {
        columns,
        rows,
        truncated: false,
    })
}

// ========== Databricks ==========

async fn execute_databricks(
    http: &reqwest::Client,
    host: &str,
    warehouse_id: &str,
    token: &str,
    sql: &str,
) -> Result<QueryRows, String> {
    let url = format!("{}/api/2.0/sql/statements/", host.trim_end_matches('/'));

    let body = json!({
        "statement": sql,
        "warehouse_id": warehouse_id,
        "wait_timeout": "30s",
    });

    let response = http
        .post(&url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Databricks request failed: {}", e))?;

    let status = response.status();
    let parsed: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse Databricks response: {}", e))?;

    if !status.is_success() {
        let message = parsed["message"].as_str().unwrap_or("unknown error");
        return Err(format!("Databricks returned {}: {}", status, message));
    }

    let state = parsed["status"]["state"].as_str().unwrap_or("UNKNOWN");
    if state != "SUCCEEDED" {
        let message = parsed["status"]["error"]["message"]
            .as_str()
            .unwrap_or("no error detail");
        return Err(format!("Databricks statement {}: {}", state, message));
    }

    let columns: Vec<String> = parsed["manifest"]["schema"]["columns"]
        .as_array()
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Vec<Value>> = parsed["result"]["data_array"]
        .as_array()
        .map(|data| {
            data.iter()
                .filter_map(|row| row.as_array())
                .map(|row| {
                    row.iter()
                        .map(|v| coerce_text_value(v.as_str()))
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(QueryRows {
        columns,
        rows,
        truncated: false,
    })
}

// ========== HTTP Gateway (TSQL) ==========

async fn execute_gateway(
    http: &reqwest::Client,
    url: &str,
    sql: &str,
) -> Result<QueryRows, String> {
    let endpoint = format!("{}/execute", url.trim_end_matches('/'));
    let response = http
        .post(&endpoint)
        .json(&json!({ "sql": sql }))
        .send()
        .await
        .map_err(|e| format!("SQL gateway request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let err_text = response.text().await.unwrap_or_default();
        return Err(format!("SQL gateway returned {}: {}", status, err_text));
    }

    let parsed: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse gateway response: {}", e))?;

    parse_gateway_result(&parsed)
}

/// Parse a gateway result set in any of the shapes sidecars emit: a raw
/// array of record objects, or an object with `columns` + `rows`/`data`.
pub fn parse_gateway_result(response: &Value) -> Result<QueryRows, String> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<Value>> = Vec::new();

    if let Some(error) = response.get("error").and_then(|e| e.as_str()) {
        return Err(error.to_string());
    }

    if let Some(arr) = response.as_array() {
        let mut all_keys = std::collections::BTreeSet::new();
        for row_val in arr {
            if let Some(obj) = row_val.as_object() {
                for key in obj.keys() {
                    all_keys.insert(key.clone());
                }
            }
        }
        columns = all_keys.into_iter().collect();

        for row_val in arr {
            if let Some(obj) = row_val.as_object() {
                rows.push(
                    columns
                        .iter()
                        .map(|key| obj.get(key).cloned().unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
    } else if let Some(obj) = response.as_object() {
        let rows_data = obj
            .get("rows")
            .or_else(|| obj.get("data"))
            .and_then(|r| r.as_array());

        if let Some(arr) = rows_data {
            columns = obj
                .get("columns")
                .and_then(|c| c.as_array())
                .map(|cols| {
                    cols.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();

            for row_val in arr {
                if let Some(row_arr) = row_val.as_array() {
                    rows.push(row_arr.clone());
                } else if let Some(row_obj) = row_val.as_object() {
                    if columns.is_empty() {
                        columns = row_obj.keys().cloned().collect();
                    }
                    rows.push(
                        columns
                            .iter()
                            .map(|key| row_obj.get(key).cloned().unwrap_or(Value::Null))
                            .collect(),
                    );
                }
            }
        } else {
            // Single record object (aggregation result)
            columns = obj.keys().cloned().collect();
            if !columns.is_empty() {
                rows.push(
                    columns
                        .iter()
                        .map(|key| obj.get(key).cloned().unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
    }

    Ok(QueryRows {
        columns,
        rows,
        truncated: false,
    })
}

/// Send an execute request through the channel and await the result.
pub async fn execute_query(
    sql_tx: &mpsc::Sender<SqlExecMsg>,
    sql: &str,
    row_limit: usize,
) -> Result<QueryRows, String> {
    let (tx, rx) = oneshot::channel();
    sql_tx
        .send(SqlExecMsg::Execute {
            sql: sql.to_string(),
            row_limit,
            respond_to: tx,
        })
        .await
        .map_err(|e| format!("Failed to send execute request: {}", e))?;
    rx.await.map_err(|_| "SQL execution actor died".to_string())?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_row_limit_sqlite() {
        assert_eq!(
            apply_row_limit("SELECT * FROM orders", 50, TargetEngine::Sqlite),
            "SELECT * FROM orders LIMIT 50"
        );
        assert_eq!(
            apply_row_limit("SELECT * FROM orders LIMIT 10", 50, TargetEngine::Sqlite),
            "SELECT * FROM orders LIMIT 10"
        );
        assert_eq!(
            apply_row_limit("SELECT * FROM orders;", 50, TargetEngine::Sqlite),
            "SELECT * FROM orders LIMIT 50"
        );
    }

    #[test]
    fn test_apply_row_limit_tsql_top() {
        assert_eq!(
            apply_row_limit("SELECT Name FROM t", 10, TargetEngine::Tsql),
            "SELECT TOP (10) Name FROM t"
        );
        assert_eq!(
            apply_row_limit("SELECT TOP 5 Name FROM t", 10, TargetEngine::Tsql),
            "SELECT TOP 5 Name FROM t"
        );
        assert_eq!(
            apply_row_limit("SELECT DISTINCT Name FROM t", 10, TargetEngine::Tsql),
            "SELECT DISTINCT TOP (10) Name FROM t"
        );
    }

    #[test]
    fn test_apply_row_limit_leaves_non_select() {
        let ddl = "PRAGMA table_info('orders')";
        assert_eq!(apply_row_limit(ddl, 50, TargetEngine::Sqlite), ddl);
    }

    #[test]
    fn test_coerce_text_value() {
        assert_eq!(coerce_text_value(Some("42")), json!(42));
        assert_eq!(coerce_text_value(Some("3.5")), json!(3.5));
        assert_eq!(coerce_text_value(Some("t")), json!(true));
        assert_eq!(coerce_text_value(Some("London")), json!("London"));
        assert_eq!(coerce_text_value(None), Value::Null);
    }

    #[test]
    fn test_parse_gateway_result_record_array() {
        let response = json!([
            {"id": 1, "name": "Alice"},
            {"id": 2, "name": "Bob"}
        ]);
        let result = parse_gateway_result(&response).unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_parse_gateway_result_columns_rows() {
        let response = json!({
            "columns": ["c"],
            "rows": [[120]]
        });
        let result = parse_gateway_result(&response).unwrap();
        assert_eq!(result.columns, vec!["c"]);
        assert_eq!(result.rows[0][0], json!(120));
    }

    #[test]
    fn test_parse_gateway_result_single_record() {
        let response = json!({"total": 9000});
        let result = parse_gateway_result(&response).unwrap();
        assert_eq!(result.columns, vec!["total"]);
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_parse_gateway_result_error() {
        let response = json!({"error": "Invalid object name 'orders'"});
        assert!(parse_gateway_result(&response).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_execution_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", [])
                .unwrap();
            conn.execute("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, NULL)", [])
                .unwrap();
        }

        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());

        let rows = execute_query(&tx, "SELECT id, name FROM t ORDER BY id", 100)
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[0][0], json!(1));
        assert_eq!(rows.rows[2][1], Value::Null);
        assert!(!rows.truncated);
    }

    #[tokio::test]
    async fn test_sqlite_row_cap_marks_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE t (id INTEGER)", []).unwrap();
            for i in 0..10 {
                conn.execute("INSERT INTO t VALUES (?1)", [i]).unwrap();
            }
        }

        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());

        let rows = execute_query(&tx, "SELECT id FROM t", 5).await.unwrap();
        assert_eq!(rows.rows.len(), 5);
        assert!(rows.truncated);
    }

    #[tokio::test]
    async fn test_sqlite_syntax_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        Connection::open(&db_path).unwrap();

        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());

        let err = execute_query(&tx, "SELEKT broken", 10).await.unwrap_err();
        assert!(err.contains("prepare") || err.contains("syntax"));
    }

    #[tokio::test]
    async fn test_list_and_describe_entities_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE orders (id INTEGER, total REAL)", [])
                .unwrap();
            conn.execute("CREATE TABLE customers (id INTEGER)", []).unwrap();
        }

        let config = ConnectionConfig {
            sqlite_path: Some(db_path),
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(8);
        let actor = SqlExecActor::new(rx, TargetEngine::Sqlite, &config).unwrap();
        tokio::spawn(actor.run());

        let (list_tx, list_rx) = oneshot::channel();
        tx.send(SqlExecMsg::ListEntities {
            respond_to: list_tx,
        })
        .await
        .unwrap();
        let entities = list_rx.await.unwrap().unwrap();
        assert_eq!(entities, vec!["customers", "orders"]);

        let (desc_tx, desc_rx) = oneshot::channel();
        tx.send(SqlExecMsg::DescribeEntity {
            entity: "orders".to_string(),
            respond_to: desc_tx,
        })
        .await
        .unwrap();
        let description = desc_rx.await.unwrap().unwrap();
        assert_eq!(description.rows.len(), 2);
        assert_eq!(description.rows[0][0], json!("id"));
        assert_eq!(description.rows[1][1], json!("REAL"));
    }

    #[test]
    fn test_missing_connection_params_rejected() {
        let (_, rx) = mpsc::channel(1);
        let err =
            SqlExecActor::new(rx, TargetEngine::Snowflake, &ConnectionConfig::default())
                .unwrap_err();
        assert!(err.contains("snowflake_account"));
    }
}
