//! Sessions: the unit of work that owns a connection.

use std::sync::Arc;

use crate::config::AccessMode;
use crate::error::DriverError;
use crate::graph::cursor::ResultCursor;
use crate::graph::lease::{attached, Lease};
use crate::graph::statement::Statement;
use crate::graph::transaction::{Transaction, TxShared};
use crate::pool::ConnectionPool;

/// A logical sequence of work on one pooled connection.
///
/// The connection is checked out lazily, on the first statement, and held
/// until the session is closed. A session runs auto-commit statements with
/// [`run`](Self::run) or opens one explicit transaction at a time with
/// [`begin_transaction`](Self::begin_transaction); it never does both at
/// once.
///
/// Sessions are not meant to be shared between tasks.
///
/// # Example
///
/// ```ignore
/// let mut session = driver.session();
/// let mut cursor = session.run("MATCH (n) RETURN count(n) AS count").await?;
/// let count = cursor.single_value("count").await?;
/// session.close().await?;
/// ```
pub struct Session {
    pool: ConnectionPool,
    mode: AccessMode,
    lease: Option<Arc<Lease>>,
    transaction: Option<Arc<TxShared>>,
    bookmark: Option<String>,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("connected", &self.lease.is_some())
            .field("bookmark", &self.last_bookmark())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(pool: ConnectionPool, mode: AccessMode) -> Self {
        Self {
            pool,
            mode,
            lease: None,
            transaction: None,
            bookmark: None,
            closed: false,
        }
    }

    /// Starts from a bookmark so the first transaction sees earlier work.
    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.bookmark = Some(bookmark.into());
        self
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// The bookmark of the last committed transaction, if any.
    pub fn last_bookmark(&self) -> Option<&str> {
        self.transaction
            .as_ref()
            .and_then(|tx| tx.bookmark())
            .or(self.bookmark.as_deref())
    }

    /// Runs an auto-commit statement.
    ///
    /// Fails if a transaction is open. The previous cursor of this session
    /// is discarded first and can no longer be used.
    pub async fn run(&mut self, statement: impl Into<Statement>) -> Result<ResultCursor, DriverError> {
        let statement = statement.into();
        let lease = self.prepare().await?;
        let header = {
            let mut slot = lease.lock().await;
            let conn = attached(&mut slot)?;
            conn.settle().await?;
            conn.run(&statement).await?
        };

        let stream_id = lease.streams.open();
        Ok(ResultCursor::new(lease, stream_id, statement, header, None))
    }

    /// Opens an explicit transaction.
    ///
    /// Fails if a transaction is already open. The previous cursor of this
    /// session is discarded first.
    pub async fn begin_transaction(&mut self) -> Result<Transaction, DriverError> {
        let lease = self.prepare().await?;
        {
            let mut slot = lease.lock().await;
            let conn = attached(&mut slot)?;
            conn.settle().await?;
            conn.begin(self.bookmark.as_deref()).await?;
        }

        let shared = TxShared::new();
        self.transaction = Some(shared.clone());
        tracing::debug!(bookmark = ?self.bookmark, "transaction started");
        Ok(Transaction::new(lease, shared))
    }

    /// Aborts whatever is running on the connection.
    ///
    /// The live cursor fails with [`DriverError::Cancelled`] and an open
    /// transaction is poisoned; it can only be rolled back.
    pub async fn reset(&mut self) -> Result<(), DriverError> {
        let Some(lease) = self.lease.clone() else {
            return Ok(());
        };
        lease.streams.interrupt();
        if let Some(tx) = self.transaction.as_ref().filter(|tx| tx.is_open()) {
            tx.poison();
        }

        let mut slot = lease.lock().await;
        attached(&mut slot)?.reset().await
    }

    /// Closes the session.
    ///
    /// An open transaction is rolled back and the open auto-commit result
    /// is discarded. The connection goes back to the pool if it is still
    /// healthy.
    pub async fn close(mut self) -> Result<(), DriverError> {
        self.closed = true;
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        let Some(mut conn) = lease.release().await else {
            return Ok(());
        };

        let result = match self.transaction.take().filter(|tx| tx.is_open()) {
            Some(tx) => {
                tracing::debug!("rolling back transaction left open at session close");
                let rolled_back = conn.rollback(tx.is_poisoned()).await;
                tx.close();
                rolled_back
            }
            None => conn.settle().await,
        };

        let healthy = result.is_ok() && !conn.needs_reset();
        self.pool.release(conn, healthy).await;
        result
    }

    /// Checks the session can start new work and returns its lease,
    /// checking a connection out if needed.
    async fn prepare(&mut self) -> Result<Arc<Lease>, DriverError> {
        if self.closed {
            return Err(DriverError::Client("the session is closed".to_string()));
        }
        self.settle_transaction().await?;

        let lease = match &self.lease {
            Some(lease) => lease.clone(),
            None => {
                let conn = self.pool.acquire(self.mode).await?;
                let lease = Lease::new(conn);
                self.lease = Some(lease.clone());
                lease
            }
        };
        lease.streams.supersede();
        Ok(lease)
    }

    /// Forgets the last transaction once it has ended, rolling it back if its
    /// handle was dropped while open.
    async fn settle_transaction(&mut self) -> Result<(), DriverError> {
        let Some(tx) = self.transaction.clone() else {
            return Ok(());
        };

        if tx.is_open() {
            if !tx.is_abandoned() {
                return Err(DriverError::Client(
                    "a transaction is open in this session; commit or roll it back first"
                        .to_string(),
                ));
            }
            if let Some(lease) = &self.lease {
                lease.streams.supersede();
                let mut slot = lease.lock().await;
                let conn = attached(&mut slot)?;
                tracing::debug!(connection = conn.id(), "rolling back abandoned transaction");
                conn.rollback(tx.is_poisoned()).await?;
            }
            tx.close();
        }

        if let Some(bookmark) = tx.bookmark() {
            self.bookmark = Some(bookmark.to_string());
        }
        self.transaction = None;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Some(lease) = self.lease.take() {
            tracing::warn!("session dropped without close; its connection will be reset before reuse");
            // The pool resets the connection on its next checkout
            drop(lease.try_release());
        }
    }
}
