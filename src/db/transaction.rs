//! Nested transaction control.
//!
//! Each [`Session`] owns a stack of frames. The outermost `atomic` scope opens
//! a real transaction, nested scopes open savepoints. While any frame is open
//! the session's autocommit flag is off; popping a frame restores the value it
//! saw on entry.
//!
//! Scope exit is terminal for its frame. Manual [`Session::commit`] and
//! [`Session::rollback`] inside a scope re-open an equivalent frame so the
//! scope keeps running transactionally.
//!
//! A scope whose future is dropped mid-body cannot run async cleanup from
//! `Drop`. Its guard records the depth the scope started at, and every
//! session entry point rolls the abandoned frames back before doing any
//! other work.

use crate::db::driver::{Driver, DriverConnection};
use crate::db::executor::{self, StatementPolicy};
use crate::db::session::Session;
use crate::error::{DbError, DbResult};
use crate::models::TransactionKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Marker value: no scope has been abandoned.
pub(crate) const NO_ABANDONED_SCOPE: usize = usize::MAX;

/// Records the entry depth of a scope unless it completes.
struct ScopeGuard {
    abandoned: Arc<AtomicUsize>,
    depth: usize,
    armed: bool,
}

impl ScopeGuard {
    fn new(abandoned: &Arc<AtomicUsize>, depth: usize) -> Self {
        Self {
            abandoned: Arc::clone(abandoned),
            depth,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_min(self.depth, Ordering::AcqRel);
        }
    }
}

/// One entry of a session's transaction stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFrame {
    Root {
        kind: Option<TransactionKind>,
        prior_autocommit: bool,
    },
    Savepoint {
        /// Savepoint name, already quoted for the dialect.
        sid: String,
        prior_autocommit: bool,
    },
}

impl TransactionFrame {
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }

    fn prior_autocommit(&self) -> bool {
        match self {
            Self::Root {
                prior_autocommit, ..
            }
            | Self::Savepoint {
                prior_autocommit, ..
            } => *prior_autocommit,
        }
    }
}

/// Generate an unquoted savepoint name.
pub fn generate_savepoint_id() -> String {
    format!("s{}", uuid::Uuid::new_v4().simple())
}

impl<D: Driver> Session<D> {
    /// Current nesting depth; 0 outside any transaction.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn frames(&self) -> &[TransactionFrame] {
        &self.frames
    }

    /// Run `body` inside an atomic scope.
    ///
    /// At depth 0 the scope is a transaction of the given `kind`, otherwise a
    /// savepoint and `kind` is ignored. On success the frame is committed or
    /// released. On failure it is rolled back and the body's error is
    /// returned; only a failed rollback of a root frame replaces it, as
    /// [`DbError::Rollback`] carrying the original as its source.
    pub async fn atomic<T, F>(&mut self, kind: Option<TransactionKind>, body: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Self) -> DbResult<T>,
    {
        self.recover_abandoned().await;
        let guard = ScopeGuard::new(&self.abandoned, self.frames.len());
        let result = match self.begin_atomic(kind).await {
            Ok(()) => self.run_in_frame(body).await,
            Err(err) => Err(err),
        };
        guard.disarm();
        result
    }

    /// Run `body` inside a root transaction. Fails if one is already open.
    pub async fn transaction<T, F>(&mut self, kind: Option<TransactionKind>, body: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Self) -> DbResult<T>,
    {
        self.recover_abandoned().await;
        let guard = ScopeGuard::new(&self.abandoned, self.frames.len());
        let result = match self.begin_transaction(kind).await {
            Ok(()) => self.run_in_frame(body).await,
            Err(err) => Err(err),
        };
        guard.disarm();
        result
    }

    /// Run `body` inside a savepoint, named `sid` or a generated name.
    pub async fn savepoint<T, F>(&mut self, sid: Option<&str>, body: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Self) -> DbResult<T>,
    {
        self.recover_abandoned().await;
        let guard = ScopeGuard::new(&self.abandoned, self.frames.len());
        let result = match self.begin_savepoint(sid).await {
            Ok(()) => self.run_in_frame(body).await,
            Err(err) => Err(err),
        };
        guard.disarm();
        result
    }

    /// Enter an atomic frame without a scope. Pair with [`Session::exit_atomic`].
    pub async fn begin_atomic(&mut self, kind: Option<TransactionKind>) -> DbResult<()> {
        self.recover_abandoned().await;
        if self.frames.is_empty() {
            self.push_root(kind).await
        } else {
            if kind.is_some() {
                debug!(kind = ?kind, "Nested atomic scope ignores transaction kind");
            }
            self.push_savepoint(None).await
        }
    }

    pub async fn begin_transaction(&mut self, kind: Option<TransactionKind>) -> DbResult<()> {
        self.recover_abandoned().await;
        if !self.frames.is_empty() {
            return Err(DbError::transaction(
                "a transaction is already open, nest with a savepoint instead",
            ));
        }
        self.push_root(kind).await
    }

    pub async fn begin_savepoint(&mut self, sid: Option<&str>) -> DbResult<()> {
        self.recover_abandoned().await;
        self.push_savepoint(sid).await
    }

    /// Leave the innermost frame.
    ///
    /// `Ok` commits (or releases) the frame, `Err` rolls it back and hands the
    /// error back.
    pub async fn exit_atomic(&mut self, outcome: DbResult<()>) -> DbResult<()> {
        self.recover_abandoned().await;
        match outcome {
            Ok(()) => self.close_frame().await,
            Err(err) => Err(self.abort_frame(err).await),
        }
    }

    /// Commit the innermost frame and re-open an equivalent one.
    ///
    /// Outside any frame this commits whatever the connection has pending.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.recover_abandoned().await;
        match self.frames.last().cloned() {
            None => self.lease.connection()?.commit().await,
            Some(TransactionFrame::Root { kind, .. }) => {
                let conn = self.lease.connection()?;
                conn.commit().await?;
                conn.begin(kind).await?;
                debug!(depth = self.frames.len(), "Transaction committed and re-opened");
                Ok(())
            }
            Some(TransactionFrame::Savepoint { sid, .. }) => {
                self.control(&format!("RELEASE SAVEPOINT {sid}")).await?;
                self.control(&format!("SAVEPOINT {sid}")).await
            }
        }
    }

    /// Roll back the innermost frame, leaving an equivalent one open.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.recover_abandoned().await;
        match self.frames.last().cloned() {
            None => self.lease.connection()?.rollback().await,
            Some(TransactionFrame::Root { kind, .. }) => {
                let conn = self.lease.connection()?;
                conn.rollback().await?;
                conn.begin(kind).await?;
                debug!(depth = self.frames.len(), "Transaction rolled back and re-opened");
                Ok(())
            }
            Some(TransactionFrame::Savepoint { sid, .. }) => {
                self.control(&format!("ROLLBACK TO SAVEPOINT {sid}")).await
            }
        }
    }

    async fn run_in_frame<T, F>(&mut self, body: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Self) -> DbResult<T>,
    {
        let depth = self.frames.len();
        let result = body(&mut *self).await;
        // A scope cancelled inside `body` may still hold frames above ours.
        self.recover_abandoned().await;

        if self.frames.len() != depth {
            let found = self.frames.len();
            self.unwind_to(depth.saturating_sub(1)).await;
            return Err(DbError::transaction(format!(
                "transaction frames exited out of order: expected depth {depth}, found {found}"
            )));
        }

        match result {
            Ok(value) => {
                self.close_frame().await?;
                Ok(value)
            }
            Err(err) => Err(self.abort_frame(err).await),
        }
    }

    async fn push_root(&mut self, kind: Option<TransactionKind>) -> DbResult<()> {
        self.lease.connection()?.begin(kind).await?;
        self.push_frame(TransactionFrame::Root {
            kind,
            prior_autocommit: self.autocommit,
        });
        info!(kind = ?kind, "Transaction started");
        Ok(())
    }

    async fn push_savepoint(&mut self, sid: Option<&str>) -> DbResult<()> {
        let name = match sid {
            Some(sid) => sid.to_string(),
            None => generate_savepoint_id(),
        };
        let sid = self.lease.connection()?.quote_identifier(&name);
        self.control(&format!("SAVEPOINT {sid}")).await?;
        self.push_frame(TransactionFrame::Savepoint {
            sid,
            prior_autocommit: self.autocommit,
        });
        debug!(savepoint = %name, depth = self.frames.len(), "Savepoint created");
        Ok(())
    }

    fn push_frame(&mut self, frame: TransactionFrame) {
        self.frames.push(frame);
        self.autocommit = false;
        self.lease.set_in_transaction(true);
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.autocommit = frame.prior_autocommit();
        }
        self.lease.set_in_transaction(!self.frames.is_empty());
    }

    /// Normal exit of the innermost frame.
    async fn close_frame(&mut self) -> DbResult<()> {
        let Some(frame) = self.frames.last().cloned() else {
            return Err(DbError::transaction("no open transaction frame to exit"));
        };
        let result = match &frame {
            TransactionFrame::Root { .. } => self.commit_root().await,
            TransactionFrame::Savepoint { sid, .. } => self.release_savepoint(sid).await,
        };
        self.pop_frame();
        result
    }

    async fn commit_root(&mut self) -> DbResult<()> {
        let conn = self.lease.connection()?;
        if let Err(err) = conn.commit().await {
            if let Err(rollback_err) = conn.rollback().await {
                warn!(
                    error = %rollback_err,
                    original = %err,
                    "Rollback after failed commit also failed"
                );
            }
            return Err(err);
        }
        info!("Transaction committed");
        Ok(())
    }

    async fn release_savepoint(&mut self, sid: &str) -> DbResult<()> {
        if let Err(err) = self.control(&format!("RELEASE SAVEPOINT {sid}")).await {
            if let Err(rollback_err) = self.control(&format!("ROLLBACK TO SAVEPOINT {sid}")).await {
                warn!(
                    savepoint = %sid,
                    error = %rollback_err,
                    "Rollback after failed savepoint release also failed"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    /// Exceptional exit of the innermost frame. Returns the error to surface.
    async fn abort_frame(&mut self, original: DbError) -> DbError {
        let Some(frame) = self.frames.last().cloned() else {
            return original;
        };
        let surfaced = match &frame {
            TransactionFrame::Root { .. } => match self.rollback_connection().await {
                Ok(()) => {
                    info!(error = %original, "Transaction rolled back");
                    original
                }
                Err(rollback_err) => DbError::rollback(rollback_err, Some(original)),
            },
            TransactionFrame::Savepoint { sid, .. } => {
                match self.control(&format!("ROLLBACK TO SAVEPOINT {sid}")).await {
                    Ok(()) => debug!(savepoint = %sid, "Savepoint rolled back"),
                    Err(rollback_err) => warn!(
                        savepoint = %sid,
                        error = %rollback_err,
                        original = %original,
                        "Savepoint rollback failed, surfacing original error"
                    ),
                }
                original
            }
        };
        self.pop_frame();
        surfaced
    }

    /// Roll back frames left open by a cancelled scope.
    pub(crate) async fn recover_abandoned(&mut self) {
        let depth = self.abandoned.swap(NO_ABANDONED_SCOPE, Ordering::AcqRel);
        if depth == NO_ABANDONED_SCOPE || self.frames.len() <= depth {
            return;
        }
        warn!(
            depth = self.frames.len(),
            target_depth = depth,
            "Rolling back frames of a cancelled atomic scope"
        );
        self.unwind_to(depth).await;
    }

    /// Roll back and pop frames until `depth` remain.
    pub(crate) async fn unwind_to(&mut self, depth: usize) {
        while self.frames.len() > depth {
            let err = self
                .abort_frame(DbError::transaction("frame abandoned before exit"))
                .await;
            warn!(error = %err, depth = self.frames.len(), "Unwound abandoned transaction frame");
        }
    }

    async fn rollback_connection(&mut self) -> DbResult<()> {
        self.lease.connection()?.rollback().await
    }

    /// Run a transaction-control statement.
    async fn control(&mut self, sql: &str) -> DbResult<()> {
        let policy = StatementPolicy::control(self.options.statement_timeout);
        let conn = self.lease.connection()?;
        executor::execute(conn, sql, &[], &policy).await.map(drop)
    }
}
