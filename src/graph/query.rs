//! Query builder for fluent statement construction.

use crate::error::DriverError;
use crate::graph::cursor::{RecordStream, ResultCursor};
use crate::graph::record::Record;
use crate::graph::statement::Statement;
use crate::graph::summary::ResultSummary;
use crate::graph::traits::StatementRunner;
use crate::graph::value::Value;

/// A builder for constructing and running statements.
///
/// `Query` provides a fluent API for adding parameters and running
/// statements against any [`StatementRunner`].
///
/// # Example
///
/// ```ignore
/// let records = session.query("MATCH (n:Person) WHERE n.age > $age RETURN n")
///     .param("age", 30)
///     .fetch_all()
///     .await?;
/// ```
pub struct Query<'a, R: StatementRunner + ?Sized> {
    runner: &'a mut R,
    statement: Statement,
}

impl<'a, R: StatementRunner + ?Sized> Query<'a, R> {
    pub fn new(runner: &'a mut R, text: &str) -> Self {
        Self {
            runner,
            statement: Statement::new(text),
        }
    }

    /// Adds a parameter to the query.
    ///
    /// Parameters are referenced in the text using `$name` syntax.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.statement = self.statement.param(name, value);
        self
    }

    /// Runs the query and returns its cursor.
    pub async fn execute(self) -> Result<ResultCursor, DriverError> {
        self.runner.run_statement(self.statement).await
    }

    /// Runs the query and returns its records as a stream.
    pub async fn stream(self) -> Result<RecordStream, DriverError> {
        Ok(self.execute().await?.into_stream())
    }

    /// Runs the query and collects all records.
    ///
    /// This is a convenience method for small results. For large results,
    /// use [`execute`](Query::execute) and walk the cursor.
    pub async fn fetch_all(self) -> Result<Vec<Record>, DriverError> {
        self.execute().await?.list().await
    }

    /// Runs the query and returns the first record, if any.
    pub async fn fetch_one(self) -> Result<Option<Record>, DriverError> {
        let mut cursor = self.execute().await?;
        if !cursor.next().await? {
            return Ok(None);
        }
        Ok(Some(cursor.record()?.clone()))
    }

    /// Runs the query and returns its only record.
    pub async fn single(self) -> Result<Record, DriverError> {
        self.execute().await?.single().await
    }

    /// Runs the query, discarding its records.
    ///
    /// Use this for writes (CREATE, MERGE, DELETE, SET).
    pub async fn consume(self) -> Result<ResultSummary, DriverError> {
        self.execute().await?.summarize().await
    }
}

/// Extension trait providing a convenient `query()` method.
///
/// Implemented for every [`StatementRunner`], so `session.query("...")`
/// and `tx.query("...")` both work.
pub trait QueryExt: StatementRunner {
    fn query(&mut self, text: &str) -> Query<'_, Self>
    where
        Self: Sized,
    {
        Query::new(self, text)
    }
}

impl<R: StatementRunner> QueryExt for R {}
