//! Scripted in-memory driver shared by the integration tests.
//!
//! Every call that reaches the "server" is appended to a shared log, so tests
//! can assert on the exact statement sequence. Failures are injected by SQL
//! substring, and query results are scripted the same way.

#![allow(dead_code)]

use db_async_exec::config::{AcquirePolicy, PoolOptions, SessionOptions};
use db_async_exec::db::{Database, Driver, DriverConnection, RawCursor};
use db_async_exec::error::{DbError, DbResult};
use db_async_exec::models::{ColumnMetadata, DatabaseType, RawRow, TransactionKind, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Failure {
    pattern: String,
    integrity: bool,
    remaining: usize,
}

struct Script {
    pattern: String,
    description: Vec<ColumnMetadata>,
    rows: Vec<RawRow>,
    cursor_name: Option<String>,
    remaining: usize,
}

#[derive(Default)]
pub struct MockState {
    log: Vec<String>,
    failures: Vec<Failure>,
    scripts: Vec<Script>,
    delays: Vec<(String, Duration)>,
    connects: usize,
    closed_connections: usize,
    closed_cursors: usize,
}

impl MockState {
    /// Consume a matching failure, if any.
    fn failure_for(&mut self, sql: &str) -> Option<DbError> {
        let failure = self
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.contains(&f.pattern))?;
        failure.remaining -= 1;
        Some(if failure.integrity {
            DbError::integrity(format!("injected constraint failure: {sql}"), None)
        } else {
            DbError::statement(format!("injected failure: {sql}"), None, "")
        })
    }

    fn delay_for(&self, sql: &str) -> Option<Duration> {
        self.delays
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, d)| *d)
    }
}

/// Handle to the shared state, cloned into every connection.
#[derive(Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&self, pattern: &str) {
        self.push_failure(pattern, false, usize::MAX);
    }

    /// Fail the next statement containing `pattern`.
    pub fn fail_once(&self, pattern: &str) {
        self.push_failure(pattern, false, 1);
    }

    /// Fail the next statement containing `pattern` with a constraint violation.
    pub fn fail_integrity_once(&self, pattern: &str) {
        self.push_failure(pattern, true, 1);
    }

    fn push_failure(&self, pattern: &str, integrity: bool, remaining: usize) {
        self.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            integrity,
            remaining,
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Answer statements containing `pattern` with these rows.
    pub fn script(&self, pattern: &str, columns: &[&str], rows: Vec<RawRow>) {
        self.push_script(pattern, columns, rows, None, usize::MAX);
    }

    /// Answer only the next statement containing `pattern` with these rows.
    pub fn script_once(&self, pattern: &str, columns: &[&str], rows: Vec<RawRow>) {
        self.push_script(pattern, columns, rows, None, 1);
    }

    /// Like [`MockHandle::script`], through a named server-side cursor.
    pub fn script_named(&self, pattern: &str, columns: &[&str], rows: Vec<RawRow>, name: &str) {
        self.push_script(pattern, columns, rows, Some(name.to_string()), usize::MAX);
    }

    fn push_script(
        &self,
        pattern: &str,
        columns: &[&str],
        rows: Vec<RawRow>,
        cursor_name: Option<String>,
        remaining: usize,
    ) {
        let description = columns
            .iter()
            .map(|c| ColumnMetadata::new(*c, "INTEGER", true))
            .collect();
        self.lock().scripts.push(Script {
            pattern: pattern.to_string(),
            description,
            rows,
            cursor_name,
            remaining,
        });
    }

    /// Make statements containing `pattern` take `delay`.
    pub fn delay_on(&self, pattern: &str, delay: Duration) {
        self.lock().delays.push((pattern.to_string(), delay));
    }

    /// Every call seen so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closed_connections(&self) -> usize {
        self.lock().closed_connections
    }

    pub fn closed_cursors(&self) -> usize {
        self.lock().closed_cursors
    }

    fn record(&self, entry: &str) {
        self.lock().log.push(entry.to_string());
    }

    /// Log `entry`, wait out any delay, then fail if a failure is armed.
    async fn round_trip(&self, entry: &str) -> DbResult<()> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.log.push(entry.to_string());
            (state.delay_for(entry), state.failure_for(entry))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct MockDriver {
    handle: MockHandle,
    db_type: DatabaseType,
}

impl MockDriver {
    pub fn new(handle: MockHandle) -> Self {
        Self {
            handle,
            db_type: DatabaseType::PostgreSQL,
        }
    }
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn connect(&self) -> DbResult<MockConnection> {
        self.handle.lock().connects += 1;
        Ok(MockConnection {
            handle: self.handle.clone(),
            db_type: self.db_type,
        })
    }

    fn database_type(&self) -> DatabaseType {
        self.db_type
    }
}

pub struct MockConnection {
    handle: MockHandle,
    db_type: DatabaseType,
}

impl DriverConnection for MockConnection {
    type Cursor = MockCursor;

    async fn execute(&mut self, sql: &str, _params: &[Value]) -> DbResult<MockCursor> {
        self.handle.round_trip(sql).await?;
        let mut state = self.handle.lock();
        let script = state
            .scripts
            .iter_mut()
            .find(|s| s.remaining > 0 && sql.contains(&s.pattern));
        let cursor = match script {
            Some(script) => {
                script.remaining -= 1;
                MockCursor {
                    handle: self.handle.clone(),
                    description: script.description.clone(),
                    rows: script.rows.iter().cloned().collect(),
                    name: script.cursor_name.clone(),
                    rows_affected: 0,
                }
            }
            None => MockCursor {
                handle: self.handle.clone(),
                description: Vec::new(),
                rows: VecDeque::new(),
                name: None,
                rows_affected: 1,
            },
        };
        Ok(cursor)
    }

    async fn begin(&mut self, kind: Option<TransactionKind>) -> DbResult<()> {
        let sql = self.db_type.begin_sql(kind);
        self.handle.round_trip(&sql).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.handle.round_trip("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.handle.round_trip("ROLLBACK").await
    }

    async fn close(self) -> DbResult<()> {
        self.handle.record("CLOSE");
        self.handle.lock().closed_connections += 1;
        Ok(())
    }
}

pub struct MockCursor {
    handle: MockHandle,
    description: Vec<ColumnMetadata>,
    rows: VecDeque<RawRow>,
    name: Option<String>,
    rows_affected: u64,
}

impl MockCursor {
    /// A standalone cursor over `rows`, for wrapper tests that need no session.
    pub fn over(handle: &MockHandle, columns: &[&str], rows: Vec<RawRow>) -> Self {
        Self {
            handle: handle.clone(),
            description: columns
                .iter()
                .map(|c| ColumnMetadata::new(*c, "INTEGER", true))
                .collect(),
            rows: rows.into(),
            name: None,
            rows_affected: 0,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RawCursor for MockCursor {
    fn description(&self) -> &[ColumnMetadata] {
        &self.description
    }

    async fn fetch_one(&mut self) -> DbResult<Option<RawRow>> {
        self.handle.lock().log.push("FETCH".to_string());
        Ok(self.rows.pop_front())
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn close(&mut self) -> DbResult<()> {
        self.handle.lock().closed_cursors += 1;
        Ok(())
    }

    fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    fn last_insert_id(&self) -> Option<i64> {
        None
    }
}

/// A database over the mock driver with `max` connections.
pub async fn mock_database(
    handle: &MockHandle,
    max: u32,
    policy: AcquirePolicy,
    options: SessionOptions,
) -> Database<MockDriver> {
    let pool_options = PoolOptions {
        max_connections: Some(max),
        min_connections: None,
        acquire_timeout_secs: Some(5),
        acquire_policy: Some(policy),
    };
    Database::with_driver(MockDriver::new(handle.clone()), &pool_options, options)
        .await
        .unwrap()
}

/// Row of integers, `None` as NULL.
pub fn row(values: &[Option<i64>]) -> RawRow {
    values
        .iter()
        .map(|v| v.map(Value::Int).unwrap_or(Value::Null))
        .collect()
}
