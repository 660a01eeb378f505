//! Raw driver seam.
//!
//! The execution layer never talks to a database client directly. It goes
//! through these traits, which cover what a DB-API style driver offers: open a
//! physical connection, run a statement and get a cursor back, transaction
//! control, and row-at-a-time fetching. [`crate::db::SqlxDriver`] is the
//! production implementation.

use crate::error::DbResult;
use crate::models::{ColumnMetadata, DatabaseType, RawRow, TransactionKind, Value};
use std::future::Future;

/// Factory for physical connections.
pub trait Driver: Send + Sync + 'static {
    type Connection: DriverConnection;

    /// Open a new physical connection.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Dialect spoken by connections of this driver.
    fn database_type(&self) -> DatabaseType;
}

/// One physical connection.
pub trait DriverConnection: Send + 'static {
    type Cursor: RawCursor;

    /// Run one statement and return a cursor over its results.
    fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbResult<Self::Cursor>> + Send;

    /// Open a root transaction.
    fn begin(
        &mut self,
        kind: Option<TransactionKind>,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Commit the open transaction. A no-op when none is open.
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Roll back the open transaction. A no-op when none is open.
    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Quote an identifier (savepoint names) for this connection's dialect.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Close the physical connection.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Results of one executed statement.
pub trait RawCursor: Send + 'static {
    /// Column descriptions. Empty for statements that return no rows.
    fn description(&self) -> &[ColumnMetadata];

    /// Fetch the next row, or `None` once exhausted.
    fn fetch_one(&mut self) -> impl Future<Output = DbResult<Option<RawRow>>> + Send;

    /// Server-side cursor name. Named cursors stay open after exhaustion.
    fn name(&self) -> Option<&str> {
        None
    }

    fn close(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rows_affected(&self) -> u64;

    fn last_insert_id(&self) -> Option<i64>;
}

/// Cursor type produced by a driver's connections.
pub type CursorOf<D> = <<D as Driver>::Connection as DriverConnection>::Cursor;
