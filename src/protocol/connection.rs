//! A single server connection and the request/reply bookkeeping around it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::DriverError;
use crate::graph::{Statement, Value};
use crate::protocol::message::{Metadata, Request, RequestKind, Response};
use crate::protocol::state::ConnectionState;
use crate::protocol::transport::Transport;

/// What a RUN is answered with.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    /// Field names shared by every record of the stream.
    pub keys: Arc<[String]>,
    /// Remaining header metadata (timings and the like).
    pub metadata: Metadata,
}

/// One frame of a streamed result.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Record(Vec<Value>),
    Summary(Metadata),
}

/// A connection to the server.
///
/// Requests may be pipelined: the connection keeps the queue of requests
/// still waiting for their terminal reply, and checks every new request
/// against the state the queue is expected to leave behind.
pub struct Connection {
    id: u64,
    transport: Box<dyn Transport>,
    state: ConnectionState,
    pending: VecDeque<RequestKind>,
    sending: bool,
    in_transaction: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl Connection {
    pub fn new(id: u64, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            transport,
            state: ConnectionState::Ready,
            pending: VecDeque::new(),
            sending: false,
            in_transaction: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_defunct(&self) -> bool {
        self.state == ConnectionState::Defunct
    }

    /// READY with nothing outstanding.
    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Ready && self.pending.is_empty()
    }

    /// True between a successful BEGIN and the end of that transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// True when the connection must be reset before someone else may use it.
    pub fn needs_reset(&self) -> bool {
        !self.is_idle() || self.in_transaction
    }

    /// True while a result stream has not seen its summary.
    pub fn has_open_stream(&self) -> bool {
        self.state == ConnectionState::Streaming
            || self
                .pending
                .iter()
                .any(|k| matches!(k, RequestKind::PullAll | RequestKind::DiscardAll))
    }

    fn expected_state(&self) -> ConnectionState {
        self.pending
            .iter()
            .fold(self.state, |state, kind| state.expect_after(*kind))
    }

    /// Runs a statement and requests all of its records.
    ///
    /// Returns once the RUN is answered; records are then read with
    /// [`next_frame`](Self::next_frame).
    pub async fn run(&mut self, statement: &Statement) -> Result<StreamHeader, DriverError> {
        tracing::debug!(connection = self.id, statement = statement.text(), "run");
        self.send(Request::run(statement.text(), statement.parameters().clone()))
            .await?;
        self.send(Request::PullAll).await?;
        self.await_header().await
    }

    /// Runs a statement whose records are not wanted and returns the merged
    /// header and summary metadata. Used for transaction control.
    pub async fn execute(&mut self, statement: &Statement) -> Result<Metadata, DriverError> {
        tracing::debug!(connection = self.id, statement = statement.text(), "execute");
        self.send(Request::run(statement.text(), statement.parameters().clone()))
            .await?;
        self.send(Request::DiscardAll).await?;
        let header = self.await_header().await?;
        let mut metadata = header.metadata;
        metadata.extend(self.drain_stream().await?);
        Ok(metadata)
    }

    /// Reads the next frame of the records being pulled.
    pub async fn next_frame(&mut self) -> Result<Frame, DriverError> {
        if self.pending.front() != Some(&RequestKind::PullAll) {
            return Err(DriverError::Client(
                "no records are being streamed on this connection".to_string(),
            ));
        }
        match self.recv().await? {
            Response::Record(values) => Ok(Frame::Record(values)),
            Response::Success(metadata) => Ok(Frame::Summary(metadata)),
            Response::Failure { code, message } => Err(DriverError::from_failure(code, message)),
            Response::Ignored => Err(DriverError::Client(
                "record request was ignored after an earlier failure".to_string(),
            )),
        }
    }

    /// Opens an explicit transaction.
    pub async fn begin(&mut self, bookmark: Option<&str>) -> Result<(), DriverError> {
        let mut statement = Statement::new("BEGIN");
        if let Some(bookmark) = bookmark {
            statement = statement.param("bookmark", bookmark);
        }
        self.execute(&statement).await?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commits the open transaction, returning the server's bookmark if any.
    pub async fn commit(&mut self) -> Result<Option<String>, DriverError> {
        // The server ends the transaction whether or not COMMIT succeeds
        self.in_transaction = false;
        let metadata = self.execute(&Statement::new("COMMIT")).await?;
        Ok(metadata
            .get("bookmark")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Ends the open transaction without committing it.
    ///
    /// A healthy connection discards any open stream and sends ROLLBACK;
    /// otherwise, or when `force_reset` is set, the connection is reset,
    /// which also discards the server-side transaction.
    pub async fn rollback(&mut self, force_reset: bool) -> Result<(), DriverError> {
        if !force_reset && self.discard_all().await.is_ok() && self.is_idle() {
            match self.execute(&Statement::new("ROLLBACK")).await {
                Ok(_) => {
                    self.in_transaction = false;
                    return Ok(());
                }
                Err(err) if self.is_defunct() => return Err(err),
                Err(err) => {
                    tracing::debug!(connection = self.id, error = %err, "rollback failed, resetting")
                }
            }
        }
        self.reset().await
    }

    /// Cuts the open stream short and returns its terminal metadata.
    ///
    /// If records are already being pulled, the ones still in flight are
    /// dropped. Does nothing when no stream is open.
    pub async fn discard_all(&mut self) -> Result<Metadata, DriverError> {
        if !self.has_open_stream() {
            return Ok(Metadata::new());
        }
        if self.state == ConnectionState::Streaming
            && !self.pending.contains(&RequestKind::DiscardAll)
        {
            self.send(Request::DiscardAll).await?;
        }
        self.drain_stream().await
    }

    /// Brings the connection back to READY before the next statement.
    ///
    /// An open stream is discarded and a failure is acknowledged. Errors of
    /// the abandoned stream are not reported; only a connection that cannot
    /// be recovered fails.
    pub async fn settle(&mut self) -> Result<(), DriverError> {
        if self.has_open_stream() && self.state != ConnectionState::Interrupted {
            if let Err(err) = self.discard_all().await {
                if self.is_defunct() {
                    return Err(err);
                }
                tracing::debug!(connection = self.id, error = %err, "discarded stream had failed");
            }
        }

        match self.state {
            ConnectionState::Ready if self.pending.is_empty() => Ok(()),
            ConnectionState::Failed => self.ack_failure().await,
            ConnectionState::Interrupted => {
                self.finish(RequestKind::Reset).await?;
                self.in_transaction = false;
                Ok(())
            }
            ConnectionState::Defunct => Err(DriverError::ServiceUnavailable(
                "connection is defunct".to_string(),
            )),
            _ => self.reset().await,
        }
    }

    /// Acknowledges a failure, returning the connection to READY.
    pub async fn ack_failure(&mut self) -> Result<(), DriverError> {
        self.send(Request::AckFailure).await?;
        self.finish(RequestKind::AckFailure).await
    }

    /// Aborts whatever is running and returns the connection to READY.
    ///
    /// Replies to earlier requests are dropped until the reset is
    /// acknowledged. A failed reset leaves the connection defunct.
    pub async fn reset(&mut self) -> Result<(), DriverError> {
        self.send(Request::Reset).await?;
        self.finish(RequestKind::Reset).await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Closes the transport. The connection is defunct afterwards.
    pub async fn close(&mut self) {
        tracing::debug!(connection = self.id, "closing connection");
        self.transport.close().await;
        self.state = ConnectionState::Defunct;
        self.pending.clear();
    }

    // ------------------------------------------------------------------------
    // Request / reply plumbing
    // ------------------------------------------------------------------------

    fn ensure_in_sync(&mut self) -> Result<(), DriverError> {
        if self.sending {
            return Err(self.defunct(DriverError::ServiceUnavailable(
                "a request was cancelled while being written".to_string(),
            )));
        }
        Ok(())
    }

    fn defunct(&mut self, err: DriverError) -> DriverError {
        tracing::warn!(connection = self.id, error = %err, "connection is defunct");
        self.state = ConnectionState::Defunct;
        self.pending.clear();
        match err {
            DriverError::ServiceUnavailable(_) | DriverError::Protocol(_) => err,
            other => DriverError::ServiceUnavailable(other.to_string()),
        }
    }

    async fn send(&mut self, request: Request) -> Result<(), DriverError> {
        self.ensure_in_sync()?;
        let kind = request.kind();
        self.expected_state().check(kind)?;

        tracing::debug!(connection = self.id, request = %kind, state = %self.state, "send");
        self.sending = true;
        let sent = self.transport.send(request).await;
        self.sending = false;

        if let Err(err) = sent {
            return Err(self.defunct(err));
        }
        self.state = self.state.on_send(kind);
        self.pending.push_back(kind);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Response, DriverError> {
        self.ensure_in_sync()?;
        let Some(&front) = self.pending.front() else {
            return Err(DriverError::Client(
                "no request is waiting for a reply".to_string(),
            ));
        };

        let response = match self.transport.recv().await {
            Ok(response) => response,
            Err(err) => return Err(self.defunct(err)),
        };

        let before = self.state;
        match &response {
            Response::Record(_) if front != RequestKind::PullAll => {
                return Err(self.defunct(DriverError::Protocol(format!(
                    "record received in reply to {}",
                    front
                ))));
            }
            Response::Record(_) => return Ok(response),
            Response::Success(_) => self.state = self.state.on_success(front),
            Response::Failure { .. } => self.state = self.state.on_failure(front),
            Response::Ignored => self.state = self.state.on_ignored(front),
        }
        self.pending.pop_front();

        if before != self.state {
            tracing::debug!(
                connection = self.id,
                request = %front,
                from = %before,
                to = %self.state,
                "state transition"
            );
        }
        if self.is_defunct() {
            self.pending.clear();
        }
        Ok(response)
    }

    async fn await_header(&mut self) -> Result<StreamHeader, DriverError> {
        match self.recv().await? {
            Response::Success(mut metadata) => {
                let keys: Arc<[String]> = match metadata.remove("fields") {
                    Some(Value::List(fields)) => fields
                        .into_iter()
                        .map(|f| match f {
                            Value::String(s) => Ok(s),
                            other => Err(other),
                        })
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|bad| {
                            self.defunct(DriverError::Protocol(format!(
                                "field name is a {}, not a string",
                                bad.type_name()
                            )))
                        })?
                        .into(),
                    Some(other) => {
                        return Err(self.defunct(DriverError::Protocol(format!(
                            "fields is a {}, not a list",
                            other.type_name()
                        ))))
                    }
                    None => Vec::new().into(),
                };
                Ok(StreamHeader { keys, metadata })
            }
            Response::Failure { code, message } => Err(DriverError::from_failure(code, message)),
            Response::Ignored => Err(DriverError::Client(
                "statement was ignored after an earlier failure".to_string(),
            )),
            Response::Record(_) => Err(self.defunct(DriverError::Protocol(
                "record received before the statement header".to_string(),
            ))),
        }
    }

    /// Reads replies until no PULL_ALL or DISCARD_ALL is outstanding.
    ///
    /// Success metadata is merged; the first failure is reported after the
    /// stream has been fully read.
    async fn drain_stream(&mut self) -> Result<Metadata, DriverError> {
        let mut metadata = Metadata::new();
        let mut failure = None;

        while matches!(
            self.pending.front(),
            Some(RequestKind::PullAll | RequestKind::DiscardAll)
        ) {
            match self.recv().await? {
                Response::Record(_) | Response::Ignored => {}
                Response::Success(meta) => metadata.extend(meta),
                Response::Failure { code, message } => {
                    failure.get_or_insert(DriverError::from_failure(code, message));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(metadata),
        }
    }

    /// Reads and drops replies until `kind`, the last request of that kind
    /// in the queue, is answered.
    async fn finish(&mut self, kind: RequestKind) -> Result<(), DriverError> {
        while self.pending.contains(&kind) {
            let front = self.pending.front().copied();
            let response = self.recv().await?;
            if front != Some(kind) || !response.is_terminal() || self.pending.contains(&kind) {
                continue;
            }
            return match response {
                Response::Failure { code, message } => {
                    let err = DriverError::from_failure(code, message);
                    Err(self.defunct(DriverError::ServiceUnavailable(format!(
                        "{} failed: {}",
                        kind, err
                    ))))
                }
                Response::Ignored => Err(DriverError::Client(format!("{} was ignored", kind))),
                _ => Ok(()),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubResult, StubServer};

    async fn connect(server: &StubServer) -> Connection {
        Connection::new(1, server.transport())
    }

    fn numbers(n: i64) -> StubResult {
        let mut result = StubResult::new(["x"]);
        for i in 1..=n {
            result = result.row([Value::from(i)]);
        }
        result
    }

    #[tokio::test]
    async fn test_run_and_pull_all() {
        let server = StubServer::new().script("UNWIND [1,2] AS x RETURN x", numbers(2));
        let mut conn = connect(&server).await;

        let header = conn
            .run(&Statement::new("UNWIND [1,2] AS x RETURN x"))
            .await
            .unwrap();
        assert_eq!(&*header.keys, &["x".to_string()]);
        assert_eq!(conn.state(), ConnectionState::Streaming);

        assert_eq!(conn.next_frame().await.unwrap(), Frame::Record(vec![Value::from(1)]));
        assert_eq!(conn.next_frame().await.unwrap(), Frame::Record(vec![Value::from(2)]));
        assert!(matches!(conn.next_frame().await.unwrap(), Frame::Summary(_)));
        assert!(conn.is_idle());
    }

    #[tokio::test]
    async fn test_run_failure_then_ack() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;

        let err = conn.run(&Statement::new("NOT A QUERY")).await.unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(conn.state(), ConnectionState::Failed);

        // Only recovery requests are accepted
        let err = conn.run(&Statement::new("RETURN 1")).await.unwrap_err();
        assert!(matches!(err, DriverError::Client(_)));

        conn.settle().await.unwrap();
        assert!(conn.is_idle());
    }

    #[tokio::test]
    async fn test_discard_mid_stream() {
        let server = StubServer::new().script("UNWIND range(1,5) AS x RETURN x", numbers(5));
        let mut conn = connect(&server).await;

        conn.run(&Statement::new("UNWIND range(1,5) AS x RETURN x"))
            .await
            .unwrap();
        assert!(matches!(conn.next_frame().await.unwrap(), Frame::Record(_)));

        conn.discard_all().await.unwrap();
        assert!(conn.is_idle());
        assert!(server.requests().contains(&Request::DiscardAll));
    }

    #[tokio::test]
    async fn test_reset_drops_stream() {
        let server = StubServer::new().script("RETURN 1 AS x", numbers(1));
        let mut conn = connect(&server).await;

        conn.run(&Statement::new("RETURN 1 AS x")).await.unwrap();
        conn.reset().await.unwrap();
        assert!(conn.is_idle());
    }

    #[tokio::test]
    async fn test_execute_merges_metadata() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;

        conn.execute(&Statement::new("BEGIN")).await.unwrap();
        let meta = conn.execute(&Statement::new("COMMIT")).await.unwrap();
        assert!(meta.contains_key("bookmark"));
        assert!(conn.is_idle());
    }

    #[tokio::test]
    async fn test_transaction_tracking() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;

        conn.begin(None).await.unwrap();
        assert!(conn.in_transaction());
        assert!(conn.needs_reset());

        let bookmark = conn.commit().await.unwrap();
        assert_eq!(bookmark.as_deref(), Some("bookmark:1"));
        assert!(!conn.needs_reset());
    }

    #[tokio::test]
    async fn test_rollback_after_failure_resets() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;

        conn.begin(None).await.unwrap();
        assert!(conn.run(&Statement::new("BROKEN")).await.is_err());
        conn.rollback(false).await.unwrap();

        assert!(conn.is_idle());
        assert!(!conn.in_transaction());
        assert!(server.requests().contains(&Request::Reset));
        assert!(!server.statements().contains(&"ROLLBACK".to_string()));
    }

    #[tokio::test]
    async fn test_transport_error_defuncts() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;
        server.break_connections();

        let err = conn.run(&Statement::new("RETURN 1")).await.unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable(_)));
        assert!(conn.is_defunct());
        assert!(conn.settle().await.is_err());
    }

    #[tokio::test]
    async fn test_next_frame_without_stream() {
        let server = StubServer::new();
        let mut conn = connect(&server).await;
        assert!(matches!(
            conn.next_frame().await,
            Err(DriverError::Client(_))
        ));
    }
}
