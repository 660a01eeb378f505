//! Logical database handle and per-connection sessions.
//!
//! [`Database`] owns the connection pool and the session policy. Every
//! [`Session`] holds one leased connection together with its own transaction
//! stack; nothing about transactions is shared between sessions.

use crate::config::{DatabaseConfig, PoolOptions, SessionOptions};
use crate::db::cursor::{Record, ResultWrapper, RowDecoder};
use crate::db::driver::{CursorOf, Driver};
use crate::db::executor::{self, StatementPolicy};
use crate::db::pool::{ConnectionPool, Lease};
use crate::db::sqlx_driver::SqlxDriver;
use crate::db::transaction::{NO_ABANDONED_SCOPE, TransactionFrame};
use crate::error::{DbError, DbResult};
use crate::models::{Statement, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct DatabaseInner<D: Driver> {
    pool: ConnectionPool<D>,
    options: SessionOptions,
    /// Ids of the execution contexts currently holding a connection.
    contexts: Mutex<Vec<u64>>,
    next_context: AtomicU64,
}

/// Shared handle to one logical database.
pub struct Database<D: Driver> {
    inner: Arc<DatabaseInner<D>>,
}

impl<D: Driver> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.inner.pool)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Database<SqlxDriver> {
    /// Connect using a database URL.
    ///
    /// Pool and session options may be passed as query parameters, see
    /// [`DatabaseConfig::parse`].
    pub async fn connect(url: &str) -> DbResult<Self> {
        let config = DatabaseConfig::parse(url).map_err(DbError::invalid_input)?;
        let driver = SqlxDriver::new(&config.connection_string)?;
        Self::with_driver(driver, &config.pool_options, config.session_options).await
    }
}

impl<D: Driver> Database<D> {
    pub async fn with_driver(
        driver: D,
        pool_options: &PoolOptions,
        options: SessionOptions,
    ) -> DbResult<Self> {
        let pool = ConnectionPool::open(driver, pool_options).await?;
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                pool,
                options,
                contexts: Mutex::new(Vec::new()),
                next_context: AtomicU64::new(1),
            }),
        })
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.inner.pool
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Lease a connection and open a session on it.
    pub async fn session(&self) -> DbResult<Session<D>> {
        let lease = self.inner.pool.acquire().await?;
        Ok(Session::new(lease, self.inner.options.clone()))
    }

    /// Run one statement on a short-lived session.
    ///
    /// The lease is released whether or not the statement succeeds.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[Value],
        require_commit: bool,
    ) -> DbResult<CursorOf<D>> {
        let mut session = self.session().await?;
        let result = session.execute(sql, params, require_commit).await;
        session.release().await;
        result
    }

    /// Run `body` on a dedicated connection, optionally inside a transaction.
    ///
    /// The handle's lock serialises only the bookkeeping of the active context
    /// list; it is not held while connecting or while `body` runs. The
    /// connection is acquired before the lock is taken so a waiting context
    /// never blocks another one from finishing.
    pub async fn execution_context<T, F>(&self, with_transaction: bool, body: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Session<D>) -> DbResult<T>,
    {
        let mut session = self.session().await?;
        let id = self.inner.next_context.fetch_add(1, Ordering::Relaxed);
        {
            let mut contexts = self.inner.contexts.lock().await;
            contexts.push(id);
            debug!(context = id, active = contexts.len(), "Execution context entered");
        }

        let result = if with_transaction {
            session.atomic(None, body).await
        } else {
            body(&mut session).await
        };

        {
            let mut contexts = self.inner.contexts.lock().await;
            contexts.retain(|c| *c != id);
            debug!(context = id, active = contexts.len(), "Execution context exited");
        }
        session.release().await;
        result
    }

    /// Number of execution contexts currently running.
    pub async fn active_contexts(&self) -> usize {
        self.inner.contexts.lock().await.len()
    }

    /// Close the pool. Idle connections are closed before this returns.
    pub async fn close(&self) {
        self.inner.pool.close().await;
        info!("Database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

/// One leased connection and its transaction stack.
pub struct Session<D: Driver> {
    pub(crate) lease: Lease<D>,
    pub(crate) frames: Vec<TransactionFrame>,
    pub(crate) autocommit: bool,
    pub(crate) options: SessionOptions,
    /// Lowest depth left behind by a cancelled scope, `NO_ABANDONED_SCOPE` if none.
    pub(crate) abandoned: Arc<AtomicUsize>,
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.frames.len())
            .field("autocommit", &self.autocommit)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Session<D> {
    pub fn new(lease: Lease<D>, options: SessionOptions) -> Self {
        Self {
            lease,
            frames: Vec::new(),
            autocommit: options.autocommit,
            options,
            abandoned: Arc::new(AtomicUsize::new(NO_ABANDONED_SCOPE)),
        }
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Change autocommit mode. Not allowed inside a transaction.
    pub fn set_autocommit(&mut self, autocommit: bool) -> DbResult<()> {
        if !self.frames.is_empty() {
            return Err(DbError::transaction(
                "cannot change autocommit inside a transaction",
            ));
        }
        self.autocommit = autocommit;
        Ok(())
    }

    /// Execute one statement and return the raw cursor.
    ///
    /// With `require_commit` the statement is committed right away when the
    /// session is in autocommit mode.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        require_commit: bool,
    ) -> DbResult<CursorOf<D>> {
        self.recover_abandoned().await;
        let policy = StatementPolicy::new(&self.options, self.autocommit, require_commit);
        let conn = self.lease.connection()?;
        executor::execute(conn, sql, params, &policy).await
    }

    /// Execute a read and wrap its cursor for decoding.
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        decoder: RowDecoder,
    ) -> DbResult<ResultWrapper<CursorOf<D>>> {
        let cursor = self.execute(sql, params, false).await?;
        Ok(ResultWrapper::new(cursor, decoder))
    }

    /// First column of the first row, if any.
    pub async fn scalar(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        let mut result = self.query(sql, params, RowDecoder::Tuples).await?;
        result.scalar().await
    }

    /// Look a row up and insert it when missing.
    ///
    /// The insert runs in an atomic scope. If it fails on a constraint, another
    /// writer probably got there first, so the lookup is retried once before the
    /// integrity error is returned. The flag is true when this call created it.
    pub async fn get_or_create(
        &mut self,
        lookup: &Statement,
        insert: &Statement,
        decoder: RowDecoder,
    ) -> DbResult<(Record, bool)> {
        if let Some(record) = self.lookup_first(lookup, decoder.clone()).await? {
            return Ok((record, false));
        }

        let created = self
            .atomic(None, async |session| {
                session.execute(&insert.sql, &insert.params, true).await?;
                session.lookup_first(lookup, decoder.clone()).await
            })
            .await;

        match created {
            Ok(Some(record)) => Ok((record, true)),
            Ok(None) => Err(DbError::not_found(lookup.sql.clone())),
            Err(err @ DbError::Integrity { .. }) => {
                debug!(error = %err, "Insert conflicted, retrying lookup");
                match self.lookup_first(lookup, decoder).await? {
                    Some(record) => Ok((record, false)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn lookup_first(
        &mut self,
        statement: &Statement,
        decoder: RowDecoder,
    ) -> DbResult<Option<Record>> {
        let mut result = self
            .query(&statement.sql, &statement.params, decoder)
            .await?;
        Ok(result.first().await?.cloned())
    }

    /// Return the connection to the pool.
    ///
    /// Frames still open (a scope whose future was dropped) are rolled back
    /// first so the connection goes back clean.
    pub async fn release(mut self) {
        self.recover_abandoned().await;
        if !self.frames.is_empty() {
            warn!(depth = self.frames.len(), "Releasing session with open transaction frames");
            self.unwind_to(0).await;
        }
        self.lease.release().await;
    }
}
