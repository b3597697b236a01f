//! Built-in tool executors invokable by the agents.

pub mod column_values;
pub mod entity_schemas;
pub mod execute_sql;
pub mod validate_sql;
