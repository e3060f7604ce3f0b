//! Explicit transactions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{DriverError, ErrorOrigin};
use crate::graph::cursor::ResultCursor;
use crate::graph::lease::{attached, Lease};
use crate::graph::statement::Statement;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    /// [`Transaction::success`] was called; closing commits.
    MarkedForSuccess,
    /// [`Transaction::failure`] was called; closing rolls back.
    MarkedForFailure,
    Closed,
}

/// State shared between a transaction, its cursors and its session.
#[derive(Debug)]
pub(crate) struct TxShared {
    open: AtomicBool,
    poisoned: AtomicBool,
    abandoned: AtomicBool,
    bookmark: OnceLock<String>,
}

impl TxShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            poisoned: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            bookmark: OnceLock::new(),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// The handle was dropped while the transaction was still open.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    pub(crate) fn bookmark(&self) -> Option<&str> {
        self.bookmark.get().map(String::as_str)
    }
}

/// An explicit transaction on a session's connection.
///
/// Statements run through [`run`](Self::run) share one server-side
/// transaction that ends with [`commit`](Self::commit),
/// [`rollback`](Self::rollback) or [`close`](Self::close). A statement
/// failure poisons the transaction: further statements are refused and
/// committing rolls back instead.
///
/// A transaction dropped while still open is rolled back by its session
/// before the session's next operation.
///
/// # Example
///
/// ```ignore
/// let mut tx = session.begin_transaction().await?;
/// tx.run(Statement::new("CREATE (n:Person {name: $name})").param("name", "Ada")).await?;
/// tx.commit().await?;
/// ```
pub struct Transaction {
    lease: Arc<Lease>,
    shared: Arc<TxShared>,
    state: TransactionState,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("poisoned", &self.shared.is_poisoned())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(lease: Arc<Lease>, shared: Arc<TxShared>) -> Self {
        Self {
            lease,
            shared,
            state: TransactionState::Open,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != TransactionState::Closed
    }

    /// True once a statement of this transaction has failed.
    pub fn is_poisoned(&self) -> bool {
        self.shared.is_poisoned()
    }

    /// Marks the transaction to be committed when closed.
    pub fn success(&mut self) {
        if self.state == TransactionState::Open {
            self.state = TransactionState::MarkedForSuccess;
        }
    }

    /// Marks the transaction to be rolled back when closed. Overrides [`success`](Self::success).
    pub fn failure(&mut self) {
        if self.is_open() {
            self.state = TransactionState::MarkedForFailure;
        }
    }

    /// Runs a statement inside the transaction.
    ///
    /// The previous cursor of this transaction is discarded first and can
    /// no longer be used.
    pub async fn run(&mut self, statement: impl Into<Statement>) -> Result<ResultCursor, DriverError> {
        match self.state {
            TransactionState::Open | TransactionState::MarkedForSuccess => {}
            TransactionState::MarkedForFailure => {
                return Err(DriverError::Client(
                    "cannot run more statements in a transaction marked for failure".to_string(),
                ))
            }
            TransactionState::Closed => {
                return Err(DriverError::Client(
                    "cannot run more statements in a closed transaction".to_string(),
                ))
            }
        }
        if self.shared.is_poisoned() {
            return Err(DriverError::Client(
                "cannot run more statements in this transaction: an earlier statement failed, roll back and retry"
                    .to_string(),
            ));
        }

        let statement = statement.into();
        self.lease.streams.supersede();
        let header = {
            let mut slot = self.lease.lock().await;
            let conn = attached(&mut slot)?;
            let ran = match conn.discard_all().await {
                Ok(_) => conn.run(&statement).await,
                Err(err) => Err(err),
            };
            ran.map_err(|err| {
                if err.origin() != ErrorOrigin::Local {
                    self.shared.poison();
                }
                err
            })?
        };

        let stream_id = self.lease.streams.open();
        Ok(ResultCursor::new(
            self.lease.clone(),
            stream_id,
            statement,
            header,
            Some(self.shared.clone()),
        ))
    }

    /// Commits the transaction.
    ///
    /// A poisoned transaction, or one marked for failure, is rolled back
    /// instead and the call fails with a client error.
    pub async fn commit(mut self) -> Result<(), DriverError> {
        match self.state {
            TransactionState::Closed => {
                return Err(DriverError::Client(
                    "cannot commit a closed transaction".to_string(),
                ))
            }
            TransactionState::MarkedForFailure => {
                self.end_with_rollback().await?;
                return Err(DriverError::Client(
                    "transaction was marked for failure and has been rolled back".to_string(),
                ));
            }
            _ => {}
        }
        if self.shared.is_poisoned() {
            self.end_with_rollback().await?;
            return Err(DriverError::Client(
                "transaction was rolled back instead of committed because a statement in it failed"
                    .to_string(),
            ));
        }

        self.lease.streams.supersede();
        let committed = {
            let mut slot = self.lease.lock().await;
            let conn = attached(&mut slot)?;
            match conn.discard_all().await {
                Ok(_) => conn.commit().await.map_err(Demotion::Commit),
                Err(err) => Err(Demotion::Stream(err)),
            }
        };

        match committed {
            Ok(bookmark) => {
                self.finish();
                if let Some(bookmark) = bookmark {
                    tracing::debug!(%bookmark, "transaction committed");
                    let _ = self.shared.bookmark.set(bookmark);
                }
                Ok(())
            }
            Err(Demotion::Stream(err)) => {
                // The last statement failed while being discarded
                self.shared.poison();
                self.end_with_rollback().await?;
                Err(DriverError::Client(format!(
                    "transaction was rolled back instead of committed because a statement in it failed: {}",
                    err
                )))
            }
            Err(Demotion::Commit(err)) => {
                self.finish();
                self.recover().await;
                Err(err)
            }
        }
    }

    /// Rolls the transaction back.
    pub async fn rollback(mut self) -> Result<(), DriverError> {
        if self.state == TransactionState::Closed {
            return Err(DriverError::Client(
                "cannot roll back a closed transaction".to_string(),
            ));
        }
        self.end_with_rollback().await
    }

    /// Ends the transaction: commits if marked for success, otherwise rolls back.
    pub async fn close(self) -> Result<(), DriverError> {
        match self.state {
            TransactionState::Closed => Ok(()),
            TransactionState::MarkedForSuccess => self.commit().await,
            _ => self.rollback().await,
        }
    }

    async fn end_with_rollback(&mut self) -> Result<(), DriverError> {
        self.lease.streams.supersede();
        let poisoned = self.shared.is_poisoned();
        let result = {
            let mut slot = self.lease.lock().await;
            match attached(&mut slot) {
                Ok(conn) => conn.rollback(poisoned).await,
                Err(err) => Err(err),
            }
        };
        self.finish();
        tracing::debug!(poisoned, ok = result.is_ok(), "transaction rolled back");
        result
    }

    /// Acknowledges a failed COMMIT so the session can carry on.
    async fn recover(&mut self) {
        let mut slot = self.lease.lock().await;
        if let Ok(conn) = attached(&mut slot) {
            if let Err(err) = conn.settle().await {
                tracing::warn!(error = %err, "failed to recover connection after commit failure");
            }
        }
    }

    fn finish(&mut self) {
        self.state = TransactionState::Closed;
        self.shared.close();
    }
}

/// Why a commit did not happen.
enum Demotion {
    Stream(DriverError),
    Commit(DriverError),
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TransactionState::Closed && self.shared.is_open() {
            tracing::warn!("transaction dropped without commit or rollback; it will be rolled back");
            self.shared.abandoned.store(true, Ordering::Release);
        }
    }
}
