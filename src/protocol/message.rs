//! Request and reply messages exchanged with the server.
//!
//! The driver depends only on this schema; turning messages into bytes is
//! the transport's concern.

use std::collections::HashMap;
use std::fmt;

use crate::graph::{Params, Value};

/// Metadata map carried by success replies.
pub type Metadata = HashMap<String, Value>;

/// A request sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Submit a statement; answered with a header carrying the field names.
    Run { statement: String, parameters: Params },
    /// Stream every record of the current result, then its summary.
    PullAll,
    /// Drop the rest of the current result and send only its summary.
    DiscardAll,
    /// Abort whatever is running and return the connection to READY.
    Reset,
    /// Acknowledge a failure so the connection accepts requests again.
    AckFailure,
}

/// Discriminant of a [`Request`], used by the state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Run,
    PullAll,
    DiscardAll,
    Reset,
    AckFailure,
}

impl Request {
    pub fn run(statement: impl Into<String>, parameters: Params) -> Self {
        Request::Run {
            statement: statement.into(),
            parameters,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Run { .. } => RequestKind::Run,
            Request::PullAll => RequestKind::PullAll,
            Request::DiscardAll => RequestKind::DiscardAll,
            Request::Reset => RequestKind::Reset,
            Request::AckFailure => RequestKind::AckFailure,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Run => "RUN",
            RequestKind::PullAll => "PULL_ALL",
            RequestKind::DiscardAll => "DISCARD_ALL",
            RequestKind::Reset => "RESET",
            RequestKind::AckFailure => "ACK_FAILURE",
        };
        f.write_str(name)
    }
}

/// A reply received from the server.
///
/// Every request is answered by exactly one terminal reply (success,
/// failure or ignored). Record replies precede the terminal reply of a
/// PULL_ALL.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Metadata),
    Record(Vec<Value>),
    Failure { code: String, message: String },
    Ignored,
}

impl Response {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Record(_))
    }
}
