//! SQL validation tool: dialect-aware parse check exposed to the agents as
//! `validate_sql`.

use serde::{Deserialize, Serialize};

use crate::config::TargetEngine;
use crate::sql_validation::{validate_select, ValidationReport};

/// Input for the validate_sql tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateSqlInput {
    pub sql: String,
}

/// Executor for the validate_sql tool.
pub struct ValidateSqlExecutor {
    engine: TargetEngine,
}

impl ValidateSqlExecutor {
    pub fn new(engine: TargetEngine) -> Self {
        Self { engine }
    }

    pub fn execute(&self, input: ValidateSqlInput) -> Result<ValidationReport, String> {
        Ok(validate_select(&input.sql, self.engine))
    }
}
