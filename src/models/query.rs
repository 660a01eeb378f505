//! Query-related data models.
//!
//! Column descriptions captured from a cursor, the fetched row type, and the
//! result shape a query asks for.

use crate::models::Value;
use serde::{Deserialize, Serialize};

/// One fetched row, cells in column order.
pub type RawRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "int8", "varchar", "TEXT")
    pub type_name: String,
    pub nullable: bool,
    /// Table or alias the column was selected from, when the driver knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
            table: None,
        }
    }

    /// Attach the owning table or alias.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }
}

/// How rows of a query are turned into results.
///
/// Chosen once per query by the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Every column flattened onto one instance of the queried model.
    #[default]
    Naive,
    Tuples,
    Dicts,
    /// Root model instance with forward references attached.
    Model,
    /// Joined rows stitched into one object graph per root entity.
    AggregateModel,
}

/// SQL text and bind values as produced by the query compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}
