//! In-process scripted server for tests.
//!
//! [`StubServer`] answers statements from a script and records every
//! request it receives, so tests can drive sessions, transactions and
//! cursors end to end and then assert on the exact wire traffic.
//! Built for unit tests and behind the `stub` feature.
//!
//! ```ignore
//! let server = StubServer::new()
//!     .script("RETURN 1 AS x", StubResult::new(["x"]).row([Value::from(1)]));
//! let driver = Driver::new(&Config::default(), server.clone())?;
//! ```
//!
//! Besides scripted statements the server understands `BEGIN`, `COMMIT`
//! and `ROLLBACK`. Unknown statements fail with a syntax error.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::DriverError;
use crate::graph::Value;
use crate::protocol::{Connector, Metadata, Request, Response, Transport};

/// The scripted outcome of one statement.
#[derive(Debug, Clone, Default)]
pub struct StubResult {
    keys: Vec<String>,
    rows: Vec<Vec<Value>>,
    summary: Metadata,
    rejection: Option<(String, String)>,
    failure: Option<(String, String)>,
}

impl StubResult {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A result with no fields and no records.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.rows.push(values.into_iter().collect());
        self
    }

    /// Adds an entry to the summary metadata.
    pub fn summary(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.summary.insert(key.to_string(), value.into());
        self
    }

    /// Fails the statement when it is run.
    pub fn reject(mut self, code: &str, message: &str) -> Self {
        self.rejection = Some((code.to_string(), message.to_string()));
        self
    }

    /// Fails the stream after all scripted rows have been sent.
    pub fn fail_after_rows(mut self, code: &str, message: &str) -> Self {
        self.failure = Some((code.to_string(), message.to_string()));
        self
    }
}

#[derive(Default)]
struct ServerState {
    scripts: HashMap<String, StubResult>,
    requests: Vec<Request>,
    connections_opened: u64,
    commits: u64,
    broken: bool,
}

/// A scripted server. Cheap to clone; clones share the script and transcript.
#[derive(Clone, Default)]
pub struct StubServer {
    state: Arc<Mutex<ServerState>>,
}

impl StubServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome of a statement, matched by exact text.
    pub fn script(self, statement: &str, result: StubResult) -> Self {
        self.lock().scripts.insert(statement.to_string(), result);
        self
    }

    /// Every request received so far, across all connections.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Texts of every RUN received so far.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match r {
                Request::Run { statement, .. } => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of requests of a given shape received so far.
    pub fn count(&self, request: &Request) -> usize {
        self.lock().requests.iter().filter(|r| *r == request).count()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    pub fn connections_opened(&self) -> u64 {
        self.lock().connections_opened
    }

    /// Makes every transport fail from now on, as if the network dropped.
    pub fn break_connections(&self) {
        self.lock().broken = true;
    }

    /// Opens a new transport to this server.
    pub fn transport(&self) -> Box<dyn Transport> {
        self.lock().connections_opened += 1;
        Box::new(StubTransport {
            server: self.clone(),
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            result: None,
            stream: None,
            failed: false,
            in_transaction: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broken(&self) -> bool {
        self.lock().broken
    }
}

#[async_trait]
impl Connector for StubServer {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Transport>, DriverError> {
        if self.broken() {
            return Err(DriverError::ServiceUnavailable(
                "stub server is unreachable".to_string(),
            ));
        }
        Ok(self.transport())
    }
}

/// Records left to send for a PULL_ALL.
struct ActiveStream {
    rows: VecDeque<Vec<Value>>,
    summary: Metadata,
    failure: Option<(String, String)>,
}

/// One connection's view of the stub server.
///
/// Requests are queued on send and processed lazily on recv, so a
/// DISCARD_ALL or RESET written while records are streaming can cut the
/// stream short.
struct StubTransport {
    server: StubServer,
    inbox: VecDeque<Request>,
    outbox: VecDeque<Response>,
    result: Option<StubResult>,
    stream: Option<ActiveStream>,
    failed: bool,
    in_transaction: bool,
}

impl StubTransport {
    fn process(&mut self, request: Request) {
        if self.failed && !matches!(request, Request::Reset | Request::AckFailure) {
            self.outbox.push_back(Response::Ignored);
            return;
        }

        match request {
            Request::Run { statement, .. } => self.process_run(&statement),
            Request::PullAll => match self.result.take() {
                Some(result) => {
                    self.stream = Some(ActiveStream {
                        rows: result.rows.into(),
                        summary: result.summary,
                        failure: result.failure,
                    })
                }
                None => self.fail("Neo.ClientError.Request.Invalid", "nothing to pull"),
            },
            Request::DiscardAll => {
                let summary = self.result.take().map(|r| r.summary).unwrap_or_default();
                self.outbox.push_back(Response::Success(summary));
            }
            Request::Reset => {
                self.failed = false;
                self.in_transaction = false;
                self.result = None;
                self.outbox.push_back(Response::Success(Metadata::new()));
            }
            Request::AckFailure => {
                self.failed = false;
                self.outbox.push_back(Response::Success(Metadata::new()));
            }
        }
    }

    fn process_run(&mut self, statement: &str) {
        let result = match statement {
            "BEGIN" => {
                self.in_transaction = true;
                StubResult::empty()
            }
            "COMMIT" | "ROLLBACK" if !self.in_transaction => {
                return self.fail(
                    "Neo.ClientError.Transaction.TransactionNotFound",
                    "no transaction is open",
                );
            }
            "COMMIT" => {
                self.in_transaction = false;
                let bookmark = {
                    let mut state = self.server.lock();
                    state.commits += 1;
                    format!("bookmark:{}", state.commits)
                };
                StubResult::empty().summary("bookmark", bookmark)
            }
            "ROLLBACK" => {
                self.in_transaction = false;
                StubResult::empty()
            }
            other => {
                let scripted = self.server.lock().scripts.get(other).cloned();
                match scripted {
                    Some(result) => result,
                    None => {
                        return self.fail(
                            "Neo.ClientError.Statement.SyntaxError",
                            &format!("unscripted statement: {}", other),
                        );
                    }
                }
            }
        };

        if let Some((code, message)) = &result.rejection {
            return self.fail(code, message);
        }

        let mut header = Metadata::new();
        header.insert(
            "fields".to_string(),
            Value::List(result.keys.iter().cloned().map(Value::String).collect()),
        );
        header.insert("result_available_after".to_string(), Value::Integer(1));
        self.result = Some(result);
        self.outbox.push_back(Response::Success(header));
    }

    fn fail(&mut self, code: &str, message: &str) {
        self.failed = true;
        self.in_transaction = false;
        self.result = None;
        self.outbox.push_back(Response::Failure {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    fn next_stream_reply(&mut self) -> Option<Response> {
        let stream = self.stream.as_mut()?;
        if let Some(row) = stream.rows.pop_front() {
            return Some(Response::Record(row));
        }

        let stream = self.stream.take()?;
        Some(match stream.failure {
            Some((code, message)) => {
                self.failed = true;
                self.in_transaction = false;
                Response::Failure { code, message }
            }
            None => {
                let mut summary = stream.summary;
                summary
                    .entry("result_consumed_after".to_string())
                    .or_insert(Value::Integer(2));
                Response::Success(summary)
            }
        })
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&mut self, request: Request) -> Result<(), DriverError> {
        if self.server.broken() {
            return Err(DriverError::ServiceUnavailable(
                "connection reset by peer".to_string(),
            ));
        }
        self.server.lock().requests.push(request.clone());

        match request {
            Request::DiscardAll => {
                // Stop producing records; the summary or failure is still sent
                if let Some(stream) = self.stream.as_mut() {
                    stream.rows.clear();
                }
                self.inbox.push_back(request);
            }
            Request::Reset => {
                // Out of band: everything queued before the reset is ignored
                if self.stream.take().is_some() {
                    self.outbox.push_back(Response::Ignored);
                }
                let skipped = self.inbox.len();
                self.inbox.clear();
                self.outbox
                    .extend(std::iter::repeat(Response::Ignored).take(skipped));
                self.process(Request::Reset);
            }
            other => self.inbox.push_back(other),
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Response, DriverError> {
        if self.server.broken() {
            return Err(DriverError::ServiceUnavailable(
                "connection reset by peer".to_string(),
            ));
        }
        loop {
            if let Some(response) = self.outbox.pop_front() {
                return Ok(response);
            }
            if let Some(response) = self.next_stream_reply() {
                return Ok(response);
            }
            match self.inbox.pop_front() {
                Some(request) => self.process(request),
                None => {
                    return Err(DriverError::ServiceUnavailable(
                        "stub server has nothing to send".to_string(),
                    ))
                }
            }
        }
    }

    async fn close(&mut self) {
        self.inbox.clear();
        self.outbox.clear();
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_stream() {
        let server = StubServer::new().script(
            "RETURN 1 AS x",
            StubResult::new(["x"]).row([Value::from(1)]),
        );
        let mut transport = server.transport();

        transport
            .send(Request::run("RETURN 1 AS x", Default::default()))
            .await
            .unwrap();
        transport.send(Request::PullAll).await.unwrap();

        assert!(matches!(transport.recv().await.unwrap(), Response::Success(_)));
        assert_eq!(
            transport.recv().await.unwrap(),
            Response::Record(vec![Value::from(1)])
        );
        assert!(matches!(transport.recv().await.unwrap(), Response::Success(_)));
        assert_eq!(server.statements(), vec!["RETURN 1 AS x".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_ignores_until_ack() {
        let server = StubServer::new();
        let mut transport = server.transport();

        transport
            .send(Request::run("garbage", Default::default()))
            .await
            .unwrap();
        transport.send(Request::PullAll).await.unwrap();
        transport.send(Request::AckFailure).await.unwrap();

        assert!(matches!(transport.recv().await.unwrap(), Response::Failure { .. }));
        assert_eq!(transport.recv().await.unwrap(), Response::Ignored);
        assert!(matches!(transport.recv().await.unwrap(), Response::Success(_)));
    }

    #[tokio::test]
    async fn test_broken_server() {
        let server = StubServer::new();
        server.break_connections();
        assert!(server.connect("localhost:7687").await.is_err());
    }
}
