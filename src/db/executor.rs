//! Statement execution.
//!
//! Runs one statement on a leased connection under a [`StatementPolicy`]:
//! - a round-trip timeout
//! - rollback after a failed statement when autocommit and autorollback are on
//! - commit after a successful statement that requires it, outside transactions
//!
//! The executor does not look at the SQL. Whether a statement needs a commit
//! is decided by the caller.

use crate::config::{DEFAULT_STATEMENT_TIMEOUT_SECS, SessionOptions};
use crate::db::driver::DriverConnection;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

/// How one statement is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementPolicy {
    pub require_commit: bool,
    pub autocommit: bool,
    pub autorollback: bool,
    pub timeout: Duration,
}

impl StatementPolicy {
    /// Policy for a statement issued by a session with the given options.
    pub fn new(options: &SessionOptions, autocommit: bool, require_commit: bool) -> Self {
        Self {
            require_commit,
            autocommit,
            autorollback: options.autorollback,
            timeout: options.statement_timeout,
        }
    }

    /// Policy for transaction-control statements (savepoints): never commits,
    /// never rolls back on its own.
    pub fn control(timeout: Duration) -> Self {
        Self {
            require_commit: false,
            autocommit: false,
            autorollback: false,
            timeout,
        }
    }
}

impl Default for StatementPolicy {
    fn default() -> Self {
        Self {
            require_commit: false,
            autocommit: true,
            autorollback: false,
            timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }
}

/// Execute `sql` and return the driver cursor.
///
/// A failed statement is always returned unchanged. If the autorollback that
/// follows it fails too, that failure is logged.
pub async fn execute<C: DriverConnection>(
    conn: &mut C,
    sql: &str,
    params: &[Value],
    policy: &StatementPolicy,
) -> DbResult<C::Cursor> {
    let start = Instant::now();
    debug!(
        sql = %sql,
        params = ?params.len(),
        require_commit = policy.require_commit,
        autocommit = policy.autocommit,
        timeout_secs = ?policy.timeout.as_secs(),
        "Executing statement"
    );

    let result = match timeout(policy.timeout, conn.execute(sql, params)).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error("statement execution", policy.timeout)),
    };

    let cursor = match result {
        Ok(cursor) => cursor,
        Err(err) => {
            debug!(sql = %sql, error = %err, "Statement failed");
            if policy.autocommit && policy.autorollback {
                if let Err(rollback_err) = conn.rollback().await {
                    error!(
                        error = %rollback_err,
                        original = %err,
                        "Autorollback failed after statement error"
                    );
                }
            }
            return Err(err);
        }
    };

    if policy.require_commit && policy.autocommit {
        conn.commit().await?;
    }

    debug!(
        execution_time_ms = start.elapsed().as_millis() as u64,
        "Statement complete"
    );
    Ok(cursor)
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}
