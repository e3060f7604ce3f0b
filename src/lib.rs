//! Graphbolt - session, transaction and streaming-cursor core of a graph database driver.
//!
//! Statements run on pooled connections speaking a pipelined
//! request/reply protocol. Results are pulled lazily through
//! [`ResultCursor`]s, and explicit [`Transaction`]s are poisoned by the
//! first failing statement.
//!
//! The async API lives in [`graph`]; [`blocking`] wraps it for callers
//! without a runtime.

pub mod blocking;
pub mod config;
pub mod error;
pub mod graph;
pub mod pool;
pub mod protocol;
#[cfg(any(test, feature = "stub"))]
pub mod stub;

pub use config::{AccessMode, Config};
pub use error::DriverError;
pub use graph::{
    Driver, QueryExt, Record, ResultCursor, ResultSummary, Session, Statement, StatementRunner,
    Transaction, Value,
};
