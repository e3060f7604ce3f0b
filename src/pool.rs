//! Connection pooling.
//!
//! Connections are pooled with deadpool. A connection handed back to the
//! pool is checked on its next checkout: defunct connections are discarded
//! and anything left mid-statement or mid-transaction is reset first, so
//! every checkout yields a READY connection.
//!
//! # Example
//!
//! ```ignore
//! let pool = ConnectionPool::new(&config, Arc::new(connector))?;
//! let conn = pool.acquire(AccessMode::Read).await?;
//! // ...
//! pool.release(conn, true).await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};

use crate::config::{AccessMode, Config};
use crate::error::DriverError;
use crate::protocol::{Connection, Connector};

/// A connection checked out of a [`ConnectionPool`].
///
/// Dereferences to [`Connection`]. Dropping it returns the connection to
/// the pool.
pub type PooledConnection = Object<ConnectionManager>;

/// Opens and recycles connections for the pool.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    address: String,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, address: impl Into<String>) -> Self {
        Self {
            connector,
            address: address.into(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.address)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = DriverError;

    async fn create(&self) -> Result<Connection, DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let transport = self.connector.connect(&self.address).await?;
        tracing::debug!(connection = id, address = %self.address, "opened connection");
        Ok(Connection::new(id, transport))
    }

    async fn recycle(&self, conn: &mut Connection, _: &Metrics) -> RecycleResult<DriverError> {
        if conn.is_defunct() {
            return Err(RecycleError::Backend(DriverError::ServiceUnavailable(
                "connection is defunct".to_string(),
            )));
        }
        if conn.needs_reset() {
            tracing::debug!(connection = conn.id(), state = %conn.state(), "resetting pooled connection");
            conn.reset().await.map_err(RecycleError::Backend)?;
        }
        Ok(())
    }
}

/// Pool of connections to one server.
///
/// This type is cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<ConnectionManager>,
    address: Arc<str>,
}

impl ConnectionPool {
    /// Creates a pool for the server configured in `config`.
    ///
    /// No connection is opened until the first [`acquire`](Self::acquire).
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> Result<Self, DriverError> {
        let manager = ConnectionManager::new(connector, config.server.address.clone());
        let pool = Pool::builder(manager)
            .max_size(config.pool.max_size)
            .wait_timeout(config.pool.acquire_timeout())
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                DriverError::ServiceUnavailable(format!("failed to create connection pool: {}", e))
            })?;

        tracing::info!(
            address = %config.server.address,
            max_size = config.pool.max_size,
            "connection pool created"
        );

        Ok(Self {
            pool,
            address: Arc::from(config.server.address.as_str()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Checks out a READY connection, opening one if none is idle.
    ///
    /// Every connection reaches the same server, so the access mode is
    /// only recorded for diagnostics.
    pub async fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, DriverError> {
        let conn = self.pool.get().await.map_err(|e| match e {
            PoolError::Backend(err) => err,
            other => DriverError::ServiceUnavailable(format!(
                "failed to acquire a connection to {}: {}",
                self.address, other
            )),
        })?;
        tracing::debug!(connection = conn.id(), ?mode, "acquired connection");
        Ok(conn)
    }

    /// Hands a connection back.
    ///
    /// Healthy connections return to the pool; anything else is closed and
    /// never handed out again.
    pub async fn release(&self, conn: PooledConnection, healthy: bool) {
        if healthy && !conn.is_defunct() {
            tracing::debug!(connection = conn.id(), "released connection");
            return;
        }
        let mut conn = Object::take(conn);
        tracing::debug!(connection = conn.id(), "discarding unhealthy connection");
        conn.close().await;
    }

    /// Connections currently open, idle or checked out.
    pub fn size(&self) -> usize {
        self.pool.status().size
    }

    /// Idle connections ready to be checked out.
    pub fn available(&self) -> usize {
        self.pool.status().available
    }

    /// Closes the pool. Idle connections are dropped and later checkouts fail.
    pub fn close(&self) {
        tracing::info!(address = %self.address, "closing connection pool");
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Statement;
    use crate::protocol::Request;
    use crate::stub::{StubResult, StubServer};

    fn pool(server: &StubServer, max_size: usize) -> ConnectionPool {
        let mut config = Config::default();
        config.pool.max_size = max_size;
        config.pool.acquire_timeout_ms = 50;
        ConnectionPool::new(&config, Arc::new(server.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_healthy_connection_is_reused() {
        let server = StubServer::new();
        let pool = pool(&server, 4);

        let conn = pool.acquire(AccessMode::Write).await.unwrap();
        let id = conn.id();
        pool.release(conn, true).await;

        let conn = pool.acquire(AccessMode::Read).await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(server.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_is_discarded() {
        let server = StubServer::new();
        let pool = pool(&server, 4);

        let conn = pool.acquire(AccessMode::Write).await.unwrap();
        let id = conn.id();
        pool.release(conn, false).await;

        let conn = pool.acquire(AccessMode::Write).await.unwrap();
        assert_ne!(conn.id(), id);
        assert_eq!(server.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_dirty_connection_is_reset_on_checkout() {
        let server = StubServer::new()
            .script("RETURN 1", StubResult::new(["1"]).row([1.into()]));
        let pool = pool(&server, 1);

        let mut conn = pool.acquire(AccessMode::Write).await.unwrap();
        conn.run(&Statement::new("RETURN 1")).await.unwrap();
        drop(conn);

        let conn = pool.acquire(AccessMode::Write).await.unwrap();
        assert!(conn.is_idle());
        assert_eq!(server.count(&Request::Reset), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let server = StubServer::new();
        let pool = pool(&server, 1);

        let _held = pool.acquire(AccessMode::Write).await.unwrap();
        let err = pool.acquire(AccessMode::Write).await.unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let server = StubServer::new();
        server.break_connections();
        let pool = pool(&server, 1);

        let err = pool.acquire(AccessMode::Write).await.unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_manager_debug_names_address() {
        let manager = ConnectionManager::new(Arc::new(StubServer::new()), "db.local:7687");
        assert!(format!("{:?}", manager).contains("db.local:7687"));
    }
}
