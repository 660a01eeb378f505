//! Data models for the execution layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod instance;
pub mod query;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, TransactionKind};
pub use instance::{
    DumpOptions, Instance, InstanceId, ModelMeta, ObjectGraph, PreparedHook, Relation,
};
pub use query::{ColumnMetadata, ExecuteResult, RawRow, ResultKind, Statement};
pub use value::{PrimaryKey, Value};
