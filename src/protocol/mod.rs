//! Wire protocol plumbing.
//!
//! - [`message`]: the request/reply schema
//! - [`state`]: the pure connection state machine
//! - [`transport`]: traits for the transport collaborator
//! - [`connection`]: one connection driving the state machine over a transport

pub mod connection;
pub mod message;
pub mod state;
pub mod transport;

pub use connection::{Connection, Frame, StreamHeader};
pub use message::{Metadata, Request, RequestKind, Response};
pub use state::ConnectionState;
pub use transport::{Connector, Transport};
