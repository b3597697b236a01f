//! Dialect-aware SQL validation: every query the agents produce must parse
//! as exactly one SELECT statement under the target dialect, with no write
//! verbs anywhere at the top level.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::{
    DatabricksDialect, Dialect, MsSqlDialect, PostgreSqlDialect, SQLiteDialect,
    SnowflakeDialect,
};
use sqlparser::parser::Parser;

use crate::config::TargetEngine;

/// Outcome of validating one SQL string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            errors: vec![error.into()],
        }
    }
}

fn dialect_for(engine: TargetEngine) -> Box<dyn Dialect> {
    match engine {
        TargetEngine::Tsql => Box::new(MsSqlDialect {}),
        TargetEngine::Postgres => Box::new(PostgreSqlDialect {}),
        TargetEngine::Snowflake => Box::new(SnowflakeDialect {}),
        TargetEngine::Databricks => Box::new(DatabricksDialect {}),
        TargetEngine::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Validate that `sql` is a single read-only SELECT under the engine's
/// dialect.
pub fn validate_select(sql: &str, engine: TargetEngine) -> ValidationReport {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return ValidationReport::failure("SQL is empty");
    }

    let dialect = dialect_for(engine);
    let statements = match Parser::parse_sql(&*dialect, trimmed) {
        Ok(statements) => statements,
        Err(e) => {
            return ValidationReport::failure(format!(
                "Parse error ({}): {}",
                engine.display_name(),
                e
            ))
        }
    };

    if statements.is_empty() {
        return ValidationReport::failure("SQL contains no statements");
    }
    if statements.len() > 1 {
        return ValidationReport::failure(format!(
            "Expected a single statement, found {}",
            statements.len()
        ));
    }

    match &statements[0] {
        Statement::Query(query) => {
            if let SetExpr::Select(select) = query.body.as_ref() {
                if select.into.is_some() {
                    return ValidationReport::failure(
                        "SELECT INTO writes a table and is not allowed",
                    );
                }
            }
            ValidationReport {
                ok: true,
                errors: Vec::new(),
            }
        }
        other => ValidationReport::failure(format!(
            "Only SELECT statements are allowed, found {}",
            statement_kind(other)
        )),
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::CreateView { .. } => "CREATE VIEW",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER TABLE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Merge { .. } => "MERGE",
        _ => "a non-SELECT statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_select_all_engines() {
        let sql = "SELECT name, total FROM orders WHERE year = 2008";
        for engine in [
            TargetEngine::Tsql,
            TargetEngine::Postgres,
            TargetEngine::Snowflake,
            TargetEngine::Databricks,
            TargetEngine::Sqlite,
        ] {
            let report = validate_select(sql, engine);
            assert!(report.ok, "{:?}: {:?}", engine, report.errors);
        }
    }

    #[test]
    fn test_tsql_top_parses_under_mssql_dialect() {
        let report = validate_select(
            "SELECT TOP (1) CountryRegion FROM SalesLT.Address",
            TargetEngine::Tsql,
        );
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn test_insert_rejected() {
        let report = validate_select("INSERT INTO t VALUES (1)", TargetEngine::Sqlite);
        assert!(!report.ok);
        assert!(report.errors[0].contains("INSERT"));
    }

    #[test]
    fn test_update_and_delete_rejected() {
        assert!(!validate_select("UPDATE t SET a = 1", TargetEngine::Postgres).ok);
        assert!(!validate_select("DELETE FROM t", TargetEngine::Postgres).ok);
        assert!(!validate_select("DROP TABLE t", TargetEngine::Postgres).ok);
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let report = validate_select("SELECT 1; SELECT 2", TargetEngine::Sqlite);
        assert!(!report.ok);
        assert!(report.errors[0].contains("single statement"));
    }

    #[test]
    fn test_select_into_rejected() {
        let report = validate_select(
            "SELECT * INTO new_table FROM orders",
            TargetEngine::Tsql,
        );
        assert!(!report.ok);
    }

    #[test]
    fn test_malformed_sql_reports_parse_error() {
        let report = validate_select("SELECT FROM WHERE", TargetEngine::Postgres);
        assert!(!report.ok);
        assert!(report.errors[0].contains("Parse error"));
    }

    #[test]
    fn test_empty_sql_rejected() {
        assert!(!validate_select("   ", TargetEngine::Sqlite).ok);
    }

    #[test]
    fn test_cte_select_allowed() {
        let sql = "WITH top_orders AS (SELECT total FROM orders) SELECT SUM(total) FROM top_orders";
        let report = validate_select(sql, TargetEngine::Snowflake);
        assert!(report.ok, "{:?}", report.errors);
    }
}
