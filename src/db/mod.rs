//! Database execution layer.
//!
//! This module provides:
//! - The raw driver seam and its sqlx implementation
//! - Connection leasing with a bounded pool
//! - Statement execution with commit/rollback policy
//! - Nested transactions and savepoints per session
//! - Lazy cursor wrappers and aggregate row stitching
//! - Type mappings and parameter binding for sqlx

pub mod aggregate;
pub mod cursor;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod session;
pub mod sqlx_driver;
pub mod transaction;
pub mod types;

pub use aggregate::{AggregateStitcher, JoinDescriptor, JoinKind, QueryMeta};
pub use cursor::{CursorState, Record, ResultWrapper, RowDecoder};
pub use driver::{CursorOf, Driver, DriverConnection, RawCursor};
pub use executor::StatementPolicy;
pub use pool::{ConnectionPool, Lease};
pub use session::{Database, Session};
pub use sqlx_driver::{SqlxConnection, SqlxCursor, SqlxDriver};
pub use transaction::{TransactionFrame, generate_savepoint_id};
