//! Error types for the session client.
//!
//! All error types implement `std::error::Error` so callers can plug them
//! into their preferred error-handling stack.

use std::error::Error;
use std::fmt;

/// Result type for session client operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session client.
///
/// Protocol violations never appear here: invalid inbound traffic is logged
/// and dropped. [`SessionError::Evicted`] is fatal: once returned, the
/// session's linearizability guarantee is void and the host must terminate
/// the process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionError {
    /// The message budget is exhausted or the request queue is full.
    ///
    /// This is a programming error: callers must respect the budget.
    BudgetExceeded,
    /// The submitted operation is in the protocol-reserved range.
    OperationReserved(u8),
    /// The cluster evicted this session.
    Evicted {
        /// View in which the eviction was issued.
        view: u32,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::BudgetExceeded => write!(f, "message budget exceeded"),
            SessionError::OperationReserved(op) => {
                write!(f, "operation {} is reserved for the protocol", op)
            }
            SessionError::Evicted { view } => write!(
                f,
                "session evicted at view {}: too many concurrent client sessions",
                view
            ),
        }
    }
}

impl Error for SessionError {}

/// Reasons an inbound message is dropped.
///
/// These are logged, never surfaced: a client must not fail because a
/// replica (or the network) produced garbage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolViolation {
    /// Message shorter than its header claims.
    Truncated,
    /// Header checksum mismatch.
    HeaderChecksum,
    /// Body checksum mismatch.
    BodyChecksum,
    /// Message for a different cluster.
    WrongCluster,
    /// Message for a different client.
    WrongClient,
    /// Command value outside the known space.
    UnknownCommand(u16),
    /// Reply received with no request inflight.
    NoInflight,
    /// Reply for an already-completed request.
    StaleRequest,
    /// Reply request number ahead of the inflight request.
    RequestMismatch,
    /// Reply parent does not extend the session's hash chain.
    ParentMismatch,
    /// Reply operation differs from the inflight operation.
    OperationMismatch,
    /// Reply op and commit numbers disagree.
    CommitMismatch,
    /// Register reply carried a zero session number.
    SessionZero,
    /// Reserved or padding bytes were non-zero.
    NonZeroReserved,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::Truncated => write!(f, "message truncated"),
            ProtocolViolation::HeaderChecksum => write!(f, "invalid header checksum"),
            ProtocolViolation::BodyChecksum => write!(f, "invalid body checksum"),
            ProtocolViolation::WrongCluster => write!(f, "wrong cluster"),
            ProtocolViolation::WrongClient => write!(f, "wrong client"),
            ProtocolViolation::UnknownCommand(command) => {
                write!(f, "unknown command {}", command)
            }
            ProtocolViolation::NoInflight => write!(f, "no request inflight"),
            ProtocolViolation::StaleRequest => write!(f, "stale request number"),
            ProtocolViolation::RequestMismatch => write!(f, "request number mismatch"),
            ProtocolViolation::ParentMismatch => write!(f, "hash chain parent mismatch"),
            ProtocolViolation::OperationMismatch => write!(f, "operation mismatch"),
            ProtocolViolation::CommitMismatch => write!(f, "op/commit mismatch"),
            ProtocolViolation::SessionZero => write!(f, "register reply with zero session"),
            ProtocolViolation::NonZeroReserved => write!(f, "non-zero reserved bytes"),
        }
    }
}

impl Error for ProtocolViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            format!("{}", SessionError::BudgetExceeded),
            "message budget exceeded"
        );
        let evicted = format!("{}", SessionError::Evicted { view: 5 });
        assert!(evicted.contains("session evicted"));
        assert!(evicted.contains("view 5"));
    }

    #[test]
    fn test_protocol_violation_display() {
        assert_eq!(
            format!("{}", ProtocolViolation::ParentMismatch),
            "hash chain parent mismatch"
        );
        assert_eq!(
            format!("{}", ProtocolViolation::UnknownCommand(9)),
            "unknown command 9"
        );
    }
}
