//! Traits for the transport collaborator.
//!
//! The driver never touches bytes. A [`Connector`] opens a [`Transport`]
//! (socket, TLS, framing and codec included) and the driver exchanges
//! typed messages over it.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::protocol::message::{Request, Response};

/// A reliable, ordered message channel to one server.
#[async_trait]
pub trait Transport: Send {
    /// Writes one request.
    ///
    /// A send dropped before completion leaves the channel in an unknown
    /// state; the connection treats that as fatal.
    async fn send(&mut self, request: Request) -> Result<(), DriverError>;

    /// Reads the next reply.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose a reply.
    async fn recv(&mut self) -> Result<Response, DriverError>;

    /// Closes the channel. Errors are not reported.
    async fn close(&mut self);
}

/// Opens transports to a server address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Transport>, DriverError>;
}
