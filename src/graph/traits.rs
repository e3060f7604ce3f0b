//! The trait shared by everything that can run a statement.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::graph::cursor::ResultCursor;
use crate::graph::session::Session;
use crate::graph::statement::Statement;
use crate::graph::transaction::Transaction;

/// Runs statements and hands back a cursor over their results.
///
/// Implemented by [`Session`] (auto-commit) and [`Transaction`], so code
/// can be written once for both.
#[async_trait]
pub trait StatementRunner: Send {
    /// Runs a statement. The runner's previous cursor can no longer be used.
    async fn run_statement(&mut self, statement: Statement) -> Result<ResultCursor, DriverError>;
}

#[async_trait]
impl StatementRunner for Session {
    async fn run_statement(&mut self, statement: Statement) -> Result<ResultCursor, DriverError> {
        self.run(statement).await
    }
}

#[async_trait]
impl StatementRunner for Transaction {
    async fn run_statement(&mut self, statement: Statement) -> Result<ResultCursor, DriverError> {
        self.run(statement).await
    }
}
