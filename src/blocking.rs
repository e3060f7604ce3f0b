//! Blocking wrappers around the async API.
//!
//! Each [`Driver`] owns a single-threaded tokio runtime and every call
//! blocks on it. Do not use these types from inside an async context;
//! use [`crate::graph`] there.
//!
//! # Example
//!
//! ```ignore
//! let driver = graphbolt::blocking::Driver::new(&config, connector)?;
//! let mut session = driver.session();
//! let mut cursor = session.run("MATCH (n) RETURN n")?;
//! for record in cursor.records() {
//!     println!("{:?}", record?);
//! }
//! session.close()?;
//! ```

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::config::{AccessMode, Config};
use crate::error::DriverError;
use crate::graph::{self, Record, RecordKey, ResultSummary, Statement, TransactionState, Value};
use crate::protocol::Connector;

/// Blocking counterpart of [`graph::Driver`].
#[derive(Clone)]
pub struct Driver {
    inner: graph::Driver,
    runtime: Arc<Runtime>,
}

impl Driver {
    pub fn new(config: &Config, connector: impl Connector + 'static) -> Result<Self, DriverError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::Client(format!("failed to start runtime: {}", e)))?;
        Ok(Self {
            inner: graph::Driver::new(config, connector)?,
            runtime: Arc::new(runtime),
        })
    }

    pub fn session(&self) -> Session {
        self.wrap(self.inner.session())
    }

    pub fn session_with(&self, mode: AccessMode) -> Session {
        self.wrap(self.inner.session_with(mode))
    }

    pub fn close(&self) {
        self.inner.close();
    }

    fn wrap(&self, inner: graph::Session) -> Session {
        Session {
            inner,
            runtime: self.runtime.clone(),
        }
    }
}

/// Blocking counterpart of [`graph::Session`].
pub struct Session {
    inner: graph::Session,
    runtime: Arc<Runtime>,
}

impl Session {
    pub fn with_bookmark(self, bookmark: impl Into<String>) -> Self {
        Self {
            inner: self.inner.with_bookmark(bookmark),
            runtime: self.runtime,
        }
    }

    pub fn run(&mut self, statement: impl Into<Statement>) -> Result<ResultCursor, DriverError> {
        let inner = self.runtime.block_on(self.inner.run(statement))?;
        Ok(ResultCursor {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn begin_transaction(&mut self) -> Result<Transaction, DriverError> {
        let inner = self.runtime.block_on(self.inner.begin_transaction())?;
        Ok(Transaction {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn reset(&mut self) -> Result<(), DriverError> {
        self.runtime.block_on(self.inner.reset())
    }

    pub fn last_bookmark(&self) -> Option<&str> {
        self.inner.last_bookmark()
    }

    pub fn close(self) -> Result<(), DriverError> {
        self.runtime.block_on(self.inner.close())
    }
}

/// Blocking counterpart of [`graph::Transaction`].
pub struct Transaction {
    inner: graph::Transaction,
    runtime: Arc<Runtime>,
}

impl Transaction {
    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.is_poisoned()
    }

    pub fn success(&mut self) {
        self.inner.success();
    }

    pub fn failure(&mut self) {
        self.inner.failure();
    }

    pub fn run(&mut self, statement: impl Into<Statement>) -> Result<ResultCursor, DriverError> {
        let inner = self.runtime.block_on(self.inner.run(statement))?;
        Ok(ResultCursor {
            inner,
            runtime: self.runtime.clone(),
        })
    }

    pub fn commit(self) -> Result<(), DriverError> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(self) -> Result<(), DriverError> {
        self.runtime.block_on(self.inner.rollback())
    }

    pub fn close(self) -> Result<(), DriverError> {
        self.runtime.block_on(self.inner.close())
    }
}

/// Blocking counterpart of [`graph::ResultCursor`].
pub struct ResultCursor {
    inner: graph::ResultCursor,
    runtime: Arc<Runtime>,
}

impl ResultCursor {
    pub fn keys(&self) -> &[String] {
        self.inner.keys()
    }

    pub fn position(&self) -> i64 {
        self.inner.position()
    }

    pub fn at_end(&self) -> bool {
        self.inner.at_end()
    }

    pub fn record(&self) -> Result<&Record, DriverError> {
        self.inner.record()
    }

    pub fn next(&mut self) -> Result<bool, DriverError> {
        self.runtime.block_on(self.inner.next())
    }

    pub fn peek(&mut self) -> Result<Option<Record>, DriverError> {
        self.runtime.block_on(self.inner.peek())
    }

    pub fn skip(&mut self, records: i64) -> Result<i64, DriverError> {
        self.runtime.block_on(self.inner.skip(records))
    }

    pub fn limit(&mut self, records: i64) -> Result<i64, DriverError> {
        self.inner.limit(records)
    }

    pub fn first(&mut self) -> Result<Record, DriverError> {
        self.runtime.block_on(self.inner.first())
    }

    pub fn first_value<'k>(&mut self, key: impl Into<RecordKey<'k>>) -> Result<Value, DriverError> {
        self.runtime.block_on(self.inner.first_value(key))
    }

    pub fn single(&mut self) -> Result<Record, DriverError> {
        self.runtime.block_on(self.inner.single())
    }

    pub fn single_value<'k>(&mut self, key: impl Into<RecordKey<'k>>) -> Result<Value, DriverError> {
        self.runtime.block_on(self.inner.single_value(key))
    }

    pub fn list(&mut self) -> Result<Vec<Record>, DriverError> {
        self.runtime.block_on(self.inner.list())
    }

    pub fn list_map<T, F>(&mut self, map: F) -> Result<Vec<T>, DriverError>
    where
        F: FnMut(Record) -> T + Send,
        T: Send,
    {
        self.runtime.block_on(self.inner.list_map(map))
    }

    pub fn summarize(&mut self) -> Result<ResultSummary, DriverError> {
        self.runtime.block_on(self.inner.summarize())
    }

    /// Iterates over the remaining records.
    pub fn records(&mut self) -> Records<'_> {
        Records { cursor: self }
    }
}

/// Iterator returned by [`ResultCursor::records`].
pub struct Records<'a> {
    cursor: &'a mut ResultCursor,
}

impl Iterator for Records<'_> {
    type Item = Result<Record, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next() {
            Ok(true) => Some(self.cursor.record().cloned()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
