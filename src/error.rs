//! Driver error types and their classification.
//!
//! Errors are classified along three axes:
//!
//! - **origin**: raised locally, reported by the server, or caused by the transport
//! - **retryability**: transient errors may succeed when the work is retried
//! - **scope**: how much state the error invalidates (cursor, transaction, connection)

use std::sync::Arc;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the driver.
///
/// `DriverError` is `Clone` so that a cursor which observed a failure can
/// re-raise the same error on every later operation.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    // Cursor preconditions
    #[error("No such record: {0}")]
    NoSuchRecord(String),

    // Local argument / precondition failures
    #[error("Client error: {0}")]
    Client(String),

    // Server-reported failures
    #[error("Client error [{code}]: {message}")]
    ServerClient { code: String, message: String },

    #[error("Transient error [{code}]: {message}")]
    Transient { code: String, message: String },

    #[error("Database error [{code}]: {message}")]
    Database { code: String, message: String },

    #[error("Session expired: {0}")]
    SessionExpired(String),

    // Transport and pool failures
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Statement cancelled: {0}")]
    Cancelled(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(Arc<ConfigError>),
}

/// Where an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Raised synchronously by the driver; no state was changed.
    Local,
    /// Reported by the server in a failure reply.
    Server,
    /// Raised by the transport or the connection pool.
    Transport,
}

/// How much driver state an error invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the call site is affected.
    Cursor,
    /// The current cursor is terminated and an enclosing transaction is poisoned.
    Transaction,
    /// The connection is defunct and will not be reused.
    Connection,
}

/// Server codes that tell the caller to route its work elsewhere.
const SESSION_EXPIRED_CODES: &[&str] = &[
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

/// Transient codes caused by the client terminating its own work; retrying is pointless.
const NON_RETRYABLE_TRANSIENT_CODES: &[&str] = &[
    "Neo.TransientError.Transaction.Terminated",
    "Neo.TransientError.Transaction.LockClientStopped",
];

impl DriverError {
    /// Builds the error for a server failure reply.
    ///
    /// Codes have the shape `<Vendor>.<Classification>.<Category>.<Title>`;
    /// the classification decides the variant.
    pub fn from_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();

        if SESSION_EXPIRED_CODES.contains(&code.as_str()) {
            return DriverError::SessionExpired(message);
        }

        match code.split('.').nth(1) {
            Some("TransientError") if NON_RETRYABLE_TRANSIENT_CODES.contains(&code.as_str()) => {
                DriverError::ServerClient { code, message }
            }
            Some("TransientError") => DriverError::Transient { code, message },
            Some("ClientError") => DriverError::ServerClient { code, message },
            _ => DriverError::Database { code, message },
        }
    }

    /// Returns the server code, for server-reported errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            DriverError::ServerClient { code, .. }
            | DriverError::Transient { code, .. }
            | DriverError::Database { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn origin(&self) -> ErrorOrigin {
        match self {
            DriverError::NoSuchRecord(_)
            | DriverError::Client(_)
            | DriverError::Cancelled(_)
            | DriverError::Config(_) => ErrorOrigin::Local,
            DriverError::ServerClient { .. }
            | DriverError::Transient { .. }
            | DriverError::Database { .. }
            | DriverError::SessionExpired(_) => ErrorOrigin::Server,
            DriverError::ServiceUnavailable(_) | DriverError::Protocol(_) => {
                ErrorOrigin::Transport
            }
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self.origin() {
            ErrorOrigin::Local => ErrorScope::Cursor,
            ErrorOrigin::Server => ErrorScope::Transaction,
            ErrorOrigin::Transport => ErrorScope::Connection,
        }
    }

    /// True when retrying the enclosing unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Transient { .. }
                | DriverError::ServiceUnavailable(_)
                | DriverError::SessionExpired(_)
        )
    }

    /// True for client errors, whether raised locally or reported by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DriverError::Client(_) | DriverError::ServerClient { .. }
        )
    }
}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::Config(Arc::new(err))
    }
}
