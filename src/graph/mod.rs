//! Sessions, transactions and result cursors over pooled connections.
//!
//! # Architecture
//!
//! - [`Driver`] - Owns the connection pool and hands out sessions
//! - [`Session`] - Holds one connection; runs auto-commit statements or one transaction at a time
//! - [`Transaction`] - Explicit transaction with commit/rollback and poisoning
//! - [`ResultCursor`] - Lazily pulled, forward-only view of one statement's records
//! - [`StatementRunner`] - The `run` operation shared by sessions and transactions
//!
//! # Usage
//!
//! ```ignore
//! use graphbolt::graph::{Driver, QueryExt};
//!
//! let driver = Driver::new(&config, connector)?;
//! let mut session = driver.session();
//!
//! // Auto-commit statement
//! let mut cursor = session.run("MATCH (n:Person) RETURN n.name AS name").await?;
//! while cursor.next().await? {
//!     println!("{}", cursor.record()?.get::<String>("name")?);
//! }
//!
//! // Statement with parameters
//! let records = session.query("MATCH (n:Person) WHERE n.age > $age RETURN n")
//!     .param("age", 30)
//!     .fetch_all()
//!     .await?;
//!
//! session.close().await?;
//! ```

mod cursor;
mod lease;
mod macros;
mod query;
mod record;
mod session;
mod statement;
mod summary;
mod traits;
mod transaction;
mod value;

pub use cursor::{RecordStream, ResultCursor};
pub use query::{Query, QueryExt};
pub use record::{Record, RecordKey};
pub use session::Session;
pub use statement::Statement;
pub use summary::{
    InputPosition, Notification, Plan, ProfiledPlan, ResultSummary, StatementType,
    SummaryCounters,
};
pub use traits::StatementRunner;
pub use transaction::{Transaction, TransactionState};
pub use value::{Node, Params, Path, Relationship, Segment, Value};

// Re-export macro (defined at crate root via #[macro_export])
#[doc(inline)]
pub use crate::statement;

// --- Driver ---

use std::future::Future;
use std::sync::Arc;

use crate::config::{AccessMode, Config};
use crate::error::DriverError;
use crate::pool::ConnectionPool;
use crate::protocol::Connector;

/// Entry point: owns the connection pool and opens sessions on it.
///
/// This type is cheap to clone; clones share the same pool.
///
/// # Example
///
/// ```ignore
/// let driver = Driver::new(&Config::load()?, connector)?;
///
/// // Transaction with closure - the closure must commit
/// let count = driver.transaction(|mut tx| async move {
///     tx.run(statement!("CREATE (n:Node {id: $id})", id = "a")).await?;
///     let count = tx.run("MATCH (n:Node) RETURN count(n) AS count").await?
///         .single_value("count")
///         .await?;
///     tx.commit().await?;
///     Ok(count)
/// }).await?;
/// ```
#[derive(Clone)]
pub struct Driver {
    pool: ConnectionPool,
    default_mode: AccessMode,
}

impl Driver {
    /// Creates a driver for the server in `config`.
    ///
    /// Connections are opened on demand through `connector`.
    pub fn new(config: &Config, connector: impl Connector + 'static) -> Result<Self, DriverError> {
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(
        config: &Config,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, DriverError> {
        Ok(Self {
            pool: ConnectionPool::new(config, connector)?,
            default_mode: config.session.access_mode,
        })
    }

    /// Opens a session with the configured access mode.
    pub fn session(&self) -> Session {
        self.session_with(self.default_mode)
    }

    /// Opens a session with an explicit access mode.
    pub fn session_with(&self, mode: AccessMode) -> Session {
        Session::new(self.pool.clone(), mode)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Executes a closure within a transaction on a fresh session.
    ///
    /// The closure receives the transaction and is responsible for calling
    /// `commit()` or `rollback()`. A transaction the closure leaves open is
    /// rolled back when the session closes.
    pub async fn transaction<F, R, Fut>(&self, f: F) -> Result<R, DriverError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<R, DriverError>>,
    {
        let mut session = self.session();
        let tx = session.begin_transaction().await?;
        let result = f(tx).await;
        let closed = session.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Closes the pool. Open sessions keep their connections until closed.
    pub fn close(&self) {
        self.pool.close();
    }
}
