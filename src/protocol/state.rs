//! Connection protocol state machine.
//!
//! A pure table: which requests are legal in each state, and how sending a
//! request or receiving its terminal reply moves the state.
//!
//! | Request      | Legal in              | After success | After failure |
//! |--------------|-----------------------|---------------|---------------|
//! | RUN          | READY                 | STREAMING     | FAILED        |
//! | PULL_ALL     | STREAMING             | READY         | FAILED        |
//! | DISCARD_ALL  | STREAMING             | READY         | FAILED        |
//! | RESET        | any but DEFUNCT       | READY         | DEFUNCT       |
//! | ACK_FAILURE  | FAILED                | READY         | DEFUNCT       |
//!
//! Sending RESET moves the connection to INTERRUPTED; until the reset is
//! acknowledged every other reply is dropped without changing the state.

use std::fmt;

use crate::error::DriverError;
use crate::protocol::message::RequestKind;

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Streaming,
    Failed,
    Interrupted,
    Defunct,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Ready => "READY",
            ConnectionState::Streaming => "STREAMING",
            ConnectionState::Failed => "FAILED",
            ConnectionState::Interrupted => "INTERRUPTED",
            ConnectionState::Defunct => "DEFUNCT",
        };
        f.write_str(name)
    }
}

impl ConnectionState {
    /// Whether `request` may be sent in this state.
    pub fn permits(self, request: RequestKind) -> bool {
        use ConnectionState::*;
        use RequestKind::*;

        match (self, request) {
            (Defunct, _) => false,
            (_, Reset) => true,
            (Ready, Run) => true,
            (Streaming, PullAll | DiscardAll) => true,
            (Failed, AckFailure) => true,
            _ => false,
        }
    }

    /// Checks `request` against this state, failing with a client error.
    pub fn check(self, request: RequestKind) -> Result<(), DriverError> {
        if self.permits(request) {
            return Ok(());
        }
        Err(match self {
            ConnectionState::Defunct => {
                DriverError::ServiceUnavailable("connection is defunct".to_string())
            }
            state => DriverError::Client(format!("{} is not allowed while {}", request, state)),
        })
    }

    /// State right after `request` has been written.
    pub fn on_send(self, request: RequestKind) -> Self {
        match request {
            RequestKind::Reset if self != ConnectionState::Defunct => ConnectionState::Interrupted,
            _ => self,
        }
    }

    /// State the connection is expected to reach once `request` succeeds.
    ///
    /// Streams stay open while their PULL_ALL or DISCARD_ALL is outstanding,
    /// so those requests leave the expectation unchanged.
    pub fn expect_after(self, request: RequestKind) -> Self {
        match request {
            RequestKind::PullAll | RequestKind::DiscardAll => self,
            other => self.on_success(other),
        }
    }

    /// State after the terminal success reply to `request`.
    pub fn on_success(self, request: RequestKind) -> Self {
        use ConnectionState::*;

        match (self, request) {
            (Defunct, _) => Defunct,
            (Interrupted, RequestKind::Reset) => Ready,
            (Interrupted, _) => Interrupted,
            (_, RequestKind::Run) => Streaming,
            (_, _) => Ready,
        }
    }

    /// State after the failure reply to `request`.
    pub fn on_failure(self, request: RequestKind) -> Self {
        use ConnectionState::*;

        match (self, request) {
            (Defunct, _) => Defunct,
            (_, RequestKind::Reset | RequestKind::AckFailure) => Defunct,
            (Interrupted, _) => Interrupted,
            (_, _) => Failed,
        }
    }

    /// State after `request` was ignored because an earlier request failed.
    pub fn on_ignored(self, _request: RequestKind) -> Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use RequestKind::*;

    const ALL_REQUESTS: [RequestKind; 5] = [Run, PullAll, DiscardAll, Reset, AckFailure];

    #[test]
    fn test_run_only_when_ready() {
        assert!(Ready.permits(Run));
        for state in [Streaming, Failed, Interrupted, Defunct] {
            assert!(!state.permits(Run), "RUN allowed in {}", state);
        }
    }

    #[test]
    fn test_failed_only_accepts_recovery() {
        for request in ALL_REQUESTS {
            let allowed = matches!(request, Reset | AckFailure);
            assert_eq!(Failed.permits(request), allowed, "{} in FAILED", request);
        }
    }

    #[test]
    fn test_defunct_accepts_nothing() {
        for request in ALL_REQUESTS {
            assert!(!Defunct.permits(request));
        }
        assert!(matches!(
            Defunct.check(Reset),
            Err(DriverError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn test_check_reports_client_error() {
        let err = Failed.check(Run).unwrap_err();
        assert!(matches!(err, DriverError::Client(_)));
        assert!(err.to_string().contains("RUN is not allowed while FAILED"));
    }

    #[test]
    fn test_statement_lifecycle() {
        let state = Ready.on_success(Run);
        assert_eq!(state, Streaming);
        assert_eq!(state.on_success(PullAll), Ready);
        assert_eq!(state.on_success(DiscardAll), Ready);
        assert_eq!(state.on_failure(PullAll), Failed);
        assert_eq!(Ready.on_failure(Run), Failed);
    }

    #[test]
    fn test_reset_interrupts_until_acknowledged() {
        let state = Streaming.on_send(Reset);
        assert_eq!(state, Interrupted);
        // Replies to earlier requests are dropped
        assert_eq!(state.on_success(PullAll), Interrupted);
        assert_eq!(state.on_failure(PullAll), Interrupted);
        assert_eq!(state.on_success(Reset), Ready);
        assert_eq!(state.on_failure(Reset), Defunct);
    }

    #[test]
    fn test_ack_failure_recovers() {
        assert_eq!(Failed.on_success(AckFailure), Ready);
        assert_eq!(Failed.on_failure(AckFailure), Defunct);
    }

    #[test]
    fn test_pipelined_expectation() {
        // RUN then PULL_ALL then DISCARD_ALL, all before any reply
        let after_run = Ready.expect_after(Run);
        assert!(after_run.permits(PullAll));
        let after_pull = after_run.expect_after(PullAll);
        assert!(after_pull.permits(DiscardAll));
        assert!(!after_pull.permits(Run));
    }

    #[test]
    fn test_ignored_keeps_state() {
        assert_eq!(Failed.on_ignored(PullAll), Failed);
    }
}
