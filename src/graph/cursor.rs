//! Streaming result cursors.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;

use crate::error::{DriverError, ErrorOrigin};
use crate::graph::lease::{attached, Lease, StreamStatus};
use crate::graph::record::{Record, RecordKey};
use crate::graph::statement::Statement;
use crate::graph::summary::ResultSummary;
use crate::graph::transaction::TxShared;
use crate::graph::value::Value;
use crate::protocol::{Frame, Metadata, StreamHeader};

/// A stream of records produced by [`ResultCursor::into_stream`].
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record, DriverError>> + Send>>;

enum Phase {
    Streaming,
    Terminated(Result<ResultSummary, DriverError>),
}

/// A forward-only cursor over the records of one statement.
///
/// Records are pulled from the connection on demand. The cursor starts
/// before the first record (position -1); [`next`](Self::next) moves it
/// forward one record at a time and [`record`](Self::record) returns the
/// record under it.
///
/// A cursor stays valid until the next statement runs on the same session
/// or transaction, or until that transaction or session ends. Afterwards
/// every operation fails with a client error, unless the cursor had
/// already seen the end of its stream.
///
/// A failure reported by the server terminates the cursor. The error is
/// returned from the operation that observed it and from every later one,
/// and an enclosing transaction is poisoned.
///
/// # Example
///
/// ```ignore
/// let mut cursor = session.run("MATCH (n:Person) RETURN n.name AS name").await?;
/// while cursor.next().await? {
///     let name: String = cursor.record()?.get("name")?;
///     println!("{}", name);
/// }
/// let summary = cursor.summarize().await?;
/// ```
pub struct ResultCursor {
    lease: Arc<Lease>,
    stream_id: u64,
    statement: Statement,
    keys: Arc<[String]>,
    header: Metadata,
    transaction: Option<Arc<TxShared>>,
    position: i64,
    current: Option<Record>,
    peeked: Option<Record>,
    // Records that may still be yielded; None means unlimited
    remaining: Option<i64>,
    phase: Phase,
    consumed: bool,
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("statement", &self.statement.text())
            .field("keys", &self.keys)
            .field("position", &self.position)
            .field("at_end", &self.at_end())
            .finish()
    }
}

impl ResultCursor {
    pub(crate) fn new(
        lease: Arc<Lease>,
        stream_id: u64,
        statement: Statement,
        header: StreamHeader,
        transaction: Option<Arc<TxShared>>,
    ) -> Self {
        Self {
            lease,
            stream_id,
            statement,
            keys: header.keys,
            header: header.metadata,
            transaction,
            position: -1,
            current: None,
            peeked: None,
            remaining: None,
            phase: Phase::Streaming,
            consumed: false,
        }
    }

    /// Field names of every record in this result.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Index of the current record; -1 before the first call to `next`.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// True once the cursor has observed the end of its stream.
    ///
    /// A cursor that failed or was invalidated before reaching the end is
    /// not at the end.
    pub fn at_end(&self) -> bool {
        matches!(self.phase, Phase::Terminated(Ok(_)))
    }

    /// True after [`list`](Self::list) or [`summarize`](Self::summarize).
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// The record under the cursor.
    pub fn record(&self) -> Result<&Record, DriverError> {
        self.check()?;
        self.current.as_ref().ok_or_else(|| {
            DriverError::NoSuchRecord(
                "no current record: call next() before reading the record".to_string(),
            )
        })
    }

    /// Moves to the next record. Returns false once the stream is exhausted.
    pub async fn next(&mut self) -> Result<bool, DriverError> {
        self.ensure_usable()?;
        let record = match self.peeked.take() {
            Some(record) => Some(record),
            None => self.fetch().await?,
        };
        match record {
            Some(record) => {
                self.current = Some(record);
                self.position += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the record `next` would move to, without moving.
    pub async fn peek(&mut self) -> Result<Option<Record>, DriverError> {
        self.ensure_usable()?;
        if self.peeked.is_none() && self.remaining != Some(0) {
            self.peeked = self.fetch().await?;
        }
        Ok(self.peeked.clone())
    }

    /// Moves forward up to `records` records; returns how many were skipped.
    pub async fn skip(&mut self, records: i64) -> Result<i64, DriverError> {
        if records < 0 {
            return Err(DriverError::Client(format!(
                "cannot skip a negative number of records: {}",
                records
            )));
        }
        self.ensure_usable()?;
        let mut skipped = 0;
        while skipped < records && self.next().await? {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Caps how many more records the cursor yields.
    ///
    /// Once the cap is reached the rest of the stream is discarded. Returns
    /// the position of the last record that may still be yielded.
    pub fn limit(&mut self, records: i64) -> Result<i64, DriverError> {
        if records < 0 {
            return Err(DriverError::Client(format!(
                "cannot limit to a negative number of records: {}",
                records
            )));
        }
        self.ensure_usable()?;

        // A peeked record counts against the new cap
        let buffered = i64::from(self.peeked.is_some());
        if records < buffered {
            self.peeked = None;
        }
        self.remaining = Some((records - buffered).max(0));
        Ok(self.position.saturating_add(records))
    }

    /// Returns the first record, moving onto it if the cursor has not moved yet.
    pub async fn first(&mut self) -> Result<Record, DriverError> {
        self.ensure_usable()?;
        if self.position > 0 {
            return Err(DriverError::NoSuchRecord(
                "cannot return the first record: the cursor has already moved past it".to_string(),
            ));
        }
        if self.position < 0 && !self.next().await? {
            return Err(DriverError::NoSuchRecord(
                "cannot return the first record: the result is empty".to_string(),
            ));
        }
        Ok(self.record()?.clone())
    }

    /// Returns one field of the first record.
    pub async fn first_value<'k>(
        &mut self,
        key: impl Into<RecordKey<'k>>,
    ) -> Result<Value, DriverError> {
        let record = self.first().await?;
        field(&record, key.into())
    }

    /// Returns the only record of the result.
    ///
    /// Fails unless the result holds exactly one record not yet moved past.
    pub async fn single(&mut self) -> Result<Record, DriverError> {
        self.ensure_usable()?;
        if self.position >= 0 && self.at_end() {
            return Err(DriverError::NoSuchRecord(
                "cannot return a single record: the cursor is exhausted".to_string(),
            ));
        }
        let record = self.first().await?;
        if self.next().await? {
            return Err(DriverError::NoSuchRecord(
                "expected a result with a single record, but it contains more".to_string(),
            ));
        }
        Ok(record)
    }

    /// Returns one field of the only record.
    pub async fn single_value<'k>(
        &mut self,
        key: impl Into<RecordKey<'k>>,
    ) -> Result<Value, DriverError> {
        let record = self.single().await?;
        field(&record, key.into())
    }

    /// Collects all remaining records, including the current one if the
    /// cursor sits on the first record.
    pub async fn list(&mut self) -> Result<Vec<Record>, DriverError> {
        self.list_map(|record| record).await
    }

    /// Like [`list`](Self::list), mapping every record.
    pub async fn list_map<T, F>(&mut self, mut map: F) -> Result<Vec<T>, DriverError>
    where
        F: FnMut(Record) -> T + Send,
        T: Send,
    {
        self.ensure_usable()?;
        if self.consumed {
            return Err(DriverError::Client(
                "the result has already been consumed".to_string(),
            ));
        }
        if self.position > 0 {
            return Err(DriverError::Client(
                "cannot list a result after moving past its first record".to_string(),
            ));
        }

        let mut items = Vec::new();
        if let (0, Some(record)) = (self.position, &self.current) {
            items.push(map(record.clone()));
        }
        while self.next().await? {
            if let Some(record) = &self.current {
                items.push(map(record.clone()));
            }
        }
        self.consumed = true;
        Ok(items)
    }

    /// Discards the remaining records and returns the summary.
    ///
    /// Calling it again returns the same summary without talking to the
    /// server.
    pub async fn summarize(&mut self) -> Result<ResultSummary, DriverError> {
        if let Phase::Terminated(Ok(summary)) = &self.phase {
            self.consumed = true;
            return Ok(summary.clone());
        }
        self.ensure_usable()?;

        self.peeked = None;
        self.discard_remaining().await?;
        self.consumed = true;
        match &self.phase {
            Phase::Terminated(Ok(summary)) => Ok(summary.clone()),
            Phase::Terminated(Err(err)) => Err(err.clone()),
            Phase::Streaming => Err(DriverError::Protocol(
                "stream did not terminate after discarding it".to_string(),
            )),
        }
    }

    /// Turns the cursor into a stream of its remaining records.
    pub fn into_stream(mut self) -> RecordStream {
        Box::pin(try_stream! {
            while self.next().await? {
                if let Some(record) = self.current.clone() {
                    yield record;
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Stream plumbing
    // ------------------------------------------------------------------------

    /// Fails if the cursor already failed or can no longer reach its stream.
    fn check(&self) -> Result<(), DriverError> {
        match &self.phase {
            Phase::Terminated(Err(err)) => return Err(err.clone()),
            Phase::Terminated(Ok(_)) => return Ok(()),
            Phase::Streaming => {}
        }
        match self.lease.streams.status(self.stream_id) {
            StreamStatus::Live => Ok(()),
            StreamStatus::Interrupted => Err(DriverError::Cancelled(
                "the statement was aborted by a session reset".to_string(),
            )),
            StreamStatus::Superseded => Err(DriverError::Client(
                "the result is no longer available: a later statement ran, or its transaction or session ended"
                    .to_string(),
            )),
        }
    }

    /// Like [`check`](Self::check), recording a lost stream so later calls fail the same way.
    fn ensure_usable(&mut self) -> Result<(), DriverError> {
        self.check().map_err(|err| {
            if matches!(self.phase, Phase::Streaming) {
                self.phase = Phase::Terminated(Err(err.clone()));
            }
            err
        })
    }

    async fn fetch(&mut self) -> Result<Option<Record>, DriverError> {
        if !matches!(self.phase, Phase::Streaming) {
            return Ok(None);
        }
        if self.remaining == Some(0) {
            self.discard_remaining().await?;
            return Ok(None);
        }

        let frame = {
            let mut slot = self.lease.lock().await;
            match attached(&mut slot) {
                Ok(conn) => conn.next_frame().await,
                Err(err) => Err(err),
            }
        };
        match frame {
            Ok(Frame::Record(values)) => {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Ok(Some(Record::new(self.keys.clone(), values)))
            }
            Ok(Frame::Summary(metadata)) => {
                self.terminate(metadata);
                Ok(None)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn discard_remaining(&mut self) -> Result<(), DriverError> {
        let discarded = {
            let mut slot = self.lease.lock().await;
            match attached(&mut slot) {
                Ok(conn) => conn.discard_all().await,
                Err(err) => Err(err),
            }
        };
        match discarded {
            Ok(metadata) => {
                self.terminate(metadata);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn terminate(&mut self, metadata: Metadata) {
        let mut merged = self.header.clone();
        merged.extend(metadata);
        let summary = ResultSummary::from_metadata(self.statement.clone(), &merged);
        self.phase = Phase::Terminated(Ok(summary));
    }

    fn fail(&mut self, err: DriverError) -> DriverError {
        tracing::debug!(statement = self.statement.text(), error = %err, "result stream failed");
        if let Some(tx) = &self.transaction {
            if err.origin() != ErrorOrigin::Local {
                tx.poison();
            }
        }
        self.phase = Phase::Terminated(Err(err.clone()));
        err
    }
}

fn field(record: &Record, key: RecordKey<'_>) -> Result<Value, DriverError> {
    record
        .lookup(key)
        .cloned()
        .ok_or_else(|| DriverError::Client(format!("the record has no field {:?}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::graph::{Driver, Session};
    use crate::protocol::Request;
    use crate::stub::{StubResult, StubServer};

    const NUMBERS: &str = "UNWIND range(1, 3) AS n RETURN n";

    fn server() -> StubServer {
        StubServer::new()
            .script(
                NUMBERS,
                StubResult::new(["n"])
                    .row([1.into()])
                    .row([2.into()])
                    .row([3.into()])
                    .summary("type", "r"),
            )
            .script("RETURN 1 AS n", StubResult::new(["n"]).row([1.into()]))
            .script("RETURN nothing", StubResult::new(["n"]))
    }

    fn session(server: &StubServer) -> Session {
        Driver::new(&Config::default(), server.clone())
            .unwrap()
            .session()
    }

    fn number(record: &Record) -> i64 {
        record.value("n").and_then(Value::as_i64).unwrap()
    }

    #[tokio::test]
    async fn test_next_walks_records() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert_eq!(cursor.position(), -1);
        assert!(cursor.record().is_err());

        let mut seen = Vec::new();
        while cursor.next().await.unwrap() {
            seen.push(number(cursor.record().unwrap()));
            assert_eq!(cursor.position() as usize, seen.len() - 1);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(cursor.at_end());
        assert!(!cursor.next().await.unwrap());
        assert_eq!(cursor.position(), 2);
    }

    #[tokio::test]
    async fn test_peek_does_not_move() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        let peeked = cursor.peek().await.unwrap().unwrap();
        assert_eq!(number(&peeked), 1);
        assert_eq!(cursor.position(), -1);

        assert!(cursor.next().await.unwrap());
        assert_eq!(cursor.record().unwrap(), &peeked);
    }

    #[tokio::test]
    async fn test_skip_and_limit() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert_eq!(cursor.skip(1).await.unwrap(), 1);
        assert_eq!(cursor.limit(1).unwrap(), 1);
        assert!(cursor.next().await.unwrap());
        assert_eq!(number(cursor.record().unwrap()), 2);
        assert!(!cursor.next().await.unwrap());
        assert!(cursor.at_end());
        assert_eq!(server.count(&Request::DiscardAll), 1);
    }

    #[tokio::test]
    async fn test_negative_arguments_leave_cursor_alone() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert!(matches!(cursor.skip(-1).await, Err(DriverError::Client(_))));
        assert!(matches!(cursor.limit(-1), Err(DriverError::Client(_))));
        assert_eq!(cursor.position(), -1);
        assert_eq!(cursor.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_first_after_moving_past() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert_eq!(number(&cursor.first().await.unwrap()), 1);
        assert_eq!(number(&cursor.first().await.unwrap()), 1);
        cursor.next().await.unwrap();
        assert!(matches!(
            cursor.first().await,
            Err(DriverError::NoSuchRecord(_))
        ));
    }

    #[tokio::test]
    async fn test_single_rejects_many_and_none() {
        let server = server();
        let mut session = session(&server);

        let mut many = session.run(NUMBERS).await.unwrap();
        assert!(matches!(many.single().await, Err(DriverError::NoSuchRecord(_))));

        let mut none = session.run("RETURN nothing").await.unwrap();
        assert!(matches!(none.single().await, Err(DriverError::NoSuchRecord(_))));

        let mut one = session.run("RETURN 1 AS n").await.unwrap();
        assert_eq!(one.single_value("n").await.unwrap(), Value::from(1));
    }

    #[tokio::test]
    async fn test_list_includes_current_first_record() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        cursor.next().await.unwrap();
        let numbers = cursor.list_map(|r| number(&r)).await.unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(cursor.is_consumed());
        assert!(matches!(cursor.list().await, Err(DriverError::Client(_))));
    }

    #[tokio::test]
    async fn test_summarize_is_idempotent() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        let summary = cursor.summarize().await.unwrap();
        let requests = server.requests().len();
        let again = cursor.summarize().await.unwrap();

        assert_eq!(summary, again);
        assert_eq!(server.requests().len(), requests);
        assert!(cursor.at_end());
        assert_eq!(summary.statement.text(), NUMBERS);
    }

    #[tokio::test]
    async fn test_peek_at_limit_reads_nothing() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        cursor.limit(1).unwrap();
        assert!(cursor.next().await.unwrap());
        let requests = server.requests().len();
        assert!(cursor.peek().await.unwrap().is_none());
        assert_eq!(server.requests().len(), requests);
        assert_eq!(cursor.position(), 0);
    }

    #[tokio::test]
    async fn test_second_limit_replaces_first() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert_eq!(cursor.limit(1).unwrap(), 0);
        assert_eq!(cursor.limit(3).unwrap(), 2);
        let numbers = cursor.list_map(|r| number(&r)).await.unwrap();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_skip_past_the_end_drains() {
        let server = server();
        let mut session = session(&server);
        let mut cursor = session.run(NUMBERS).await.unwrap();

        assert_eq!(cursor.skip(i64::MAX).await.unwrap(), 3);
        assert_eq!(cursor.position(), 2);
        assert!(cursor.at_end());
        assert_eq!(cursor.skip(5).await.unwrap(), 0);
        assert_eq!(cursor.position(), 2);
    }

    #[tokio::test]
    async fn test_invalidated_cursor_is_not_at_end() {
        let server = server();
        let mut session = session(&server);
        let mut first = session.run(NUMBERS).await.unwrap();
        session.run("RETURN 1 AS n").await.unwrap();

        assert!(matches!(first.next().await, Err(DriverError::Client(_))));
        assert!(!first.at_end());
    }

    #[tokio::test]
    async fn test_into_stream() {
        use futures::TryStreamExt;

        let server = server();
        let mut session = session(&server);
        let cursor = session.run(NUMBERS).await.unwrap();

        let records: Vec<Record> = cursor.into_stream().try_collect().await.unwrap();
        assert_eq!(records.len(), 3);
    }
}
