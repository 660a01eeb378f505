//! Connection pool management.
//!
//! A bounded pool of physical connections. The bound is a semaphore whose
//! owned permits travel with each [`Lease`], so a connection and its slot are
//! always given back together.

use crate::config::{AcquirePolicy, PoolOptions};
use crate::db::driver::{Driver, DriverConnection};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct PoolInner<D: Driver> {
    driver: D,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<D::Connection>>,
    closed: AtomicBool,
    max_connections: u32,
    acquire_timeout: Duration,
    acquire_policy: AcquirePolicy,
}

impl<D: Driver> PoolInner<D> {
    fn push_idle(&self, conn: D::Connection) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(conn);
    }

    fn pop_idle(&self) -> Option<D::Connection> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Shared handle to a bounded connection pool.
pub struct ConnectionPool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Driver> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.inner.max_connections)
            .field("available", &self.available())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionPool<D> {
    /// Create the pool and open `min_connections` connections up front.
    pub async fn open(driver: D, options: &PoolOptions) -> DbResult<Self> {
        options.validate().map_err(DbError::invalid_input)?;

        let is_sqlite = driver.database_type() == DatabaseType::SQLite;
        let max_connections = options.max_connections_or_default(is_sqlite);
        let min_connections = options.min_connections_or_default().min(max_connections);

        let pool = Self {
            inner: Arc::new(PoolInner {
                driver,
                semaphore: Arc::new(Semaphore::new(max_connections as usize)),
                idle: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
                max_connections,
                acquire_timeout: options.acquire_timeout_or_default(),
                acquire_policy: options.acquire_policy_or_default(),
            }),
        };

        for _ in 0..min_connections {
            let conn = pool.inner.driver.connect().await?;
            pool.inner.push_idle(conn);
        }

        info!(
            db_type = %pool.inner.driver.database_type(),
            max_connections,
            min_connections,
            policy = ?pool.inner.acquire_policy,
            "Connection pool ready"
        );
        Ok(pool)
    }

    /// Lease a connection.
    ///
    /// Under [`AcquirePolicy::Wait`] this suspends until another lease is
    /// released, failing with `PoolExhausted` once the acquire timeout elapses.
    /// Under [`AcquirePolicy::Fail`] an exhausted pool fails immediately.
    pub async fn acquire(&self) -> DbResult<Lease<D>> {
        if self.inner.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let permit = match self.inner.acquire_policy {
            AcquirePolicy::Wait => {
                let wait = self.inner.acquire_timeout;
                match timeout(wait, Arc::clone(&self.inner.semaphore).acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(DbError::PoolClosed),
                    Err(_) => {
                        return Err(DbError::pool_exhausted(format!(
                            "no connection became available within {}s",
                            wait.as_secs()
                        )));
                    }
                }
            }
            AcquirePolicy::Fail => match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::Closed) => return Err(DbError::PoolClosed),
                Err(TryAcquireError::NoPermits) => {
                    return Err(DbError::pool_exhausted(format!(
                        "all {} connections are leased",
                        self.inner.max_connections
                    )));
                }
            },
        };

        let conn = match self.inner.pop_idle() {
            Some(conn) => conn,
            None => {
                debug!("Opening new physical connection");
                self.inner.driver.connect().await?
            }
        };

        Ok(Lease {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
            in_transaction: false,
        })
    }

    /// Close the pool.
    ///
    /// Pending and future acquires fail with `PoolClosed`. Idle connections are
    /// closed before this returns; leased ones are closed when released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();

        let idle: Vec<_> = {
            let mut guard = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        let count = idle.len();
        for conn in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "Failed to close idle connection");
            }
        }
        info!(closed_idle = count, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of leases that could be handed out right now.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn max_connections(&self) -> u32 {
        self.inner.max_connections
    }

    pub fn database_type(&self) -> DatabaseType {
        self.inner.driver.database_type()
    }
}

/// Exclusive ownership of one pooled connection.
///
/// Prefer [`Lease::release`]; dropping a lease also returns the connection,
/// except when it was marked as holding an open transaction, in which case
/// the connection is discarded.
pub struct Lease<D: Driver> {
    conn: Option<D::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<D>>,
    in_transaction: bool,
}

impl<D: Driver> std::fmt::Debug for Lease<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("in_transaction", &self.in_transaction)
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Lease<D> {
    pub fn connection(&mut self) -> DbResult<&mut D::Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("lease already released"))
    }

    /// Flag the connection as carrying an open transaction.
    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Give the connection back to the pool.
    ///
    /// After the pool is closed this closes the connection instead.
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.pool.is_closed() || self.in_transaction {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing released connection");
            }
        } else {
            self.pool.push_idle(conn);
        }
        // Permit goes back only after the connection is idle again.
        self.permit.take();
    }
}

impl<D: Driver> Drop for Lease<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction {
            warn!("Lease dropped with an open transaction, discarding connection");
            drop(conn);
        } else if self.pool.is_closed() {
            drop(conn);
        } else {
            warn!("Lease dropped without release, returning connection to pool");
            self.pool.push_idle(conn);
        }
        self.permit.take();
    }
}
