//! Async execution layer for ORMs.
//!
//! Leases connections from a bounded pool, runs statements with
//! autocommit/autorollback policy, nests atomic scopes as transactions and
//! savepoints, and wraps cursors so rows are decoded lazily into tuples,
//! dicts, model instances or stitched aggregate object graphs.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DatabaseConfig, PoolOptions, SessionOptions};
pub use db::{Database, ResultWrapper, RowDecoder, Session};
pub use error::{DbError, DbResult};
