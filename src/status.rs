//! Structured call statuses.
//!
//! Every call terminates with a [`Status`]: a code from a closed taxonomy
//! plus a human-readable message. Statuses are values, not exceptions; they
//! are encoded into the call's trailer frame and surfaced verbatim on the
//! caller side. A broken connection is *not* a status; that is
//! [`CallError::Transport`].

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Closed status-code taxonomy carried across the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Call completed successfully.
    Ok,
    /// Malformed input: unparsable identifier, negative domain value, etc.
    InvalidArgument,
    /// Lookup miss against the store.
    NotFound,
    /// Unexpected store or encoding failure.
    Internal,
    /// Governor-detected timeout.
    DeadlineExceeded,
    /// Caller-initiated cancellation.
    Cancelled,
    /// Operation rejected by channel state (e.g. send after close).
    FailedPrecondition,
    /// Method is not known to the server.
    Unimplemented,
}

/// Terminal outcome of a call: code plus message.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: StatusCode,
    message: String,
}

impl Status {
    /// Create a status with an arbitrary code.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Successful completion.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::DeadlineExceeded, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    /// The status code.
    #[inline]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// The human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this status represents success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{:?}: {}", self.code, self.message)
        }
    }
}

/// Client-visible call failure.
///
/// The two variants are different failure classes and must not be conflated:
/// `Status` means the call completed with an error status from the peer,
/// `Transport` means the connection itself failed and the call's fate is
/// unknown.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The call completed with a non-OK terminal status.
    #[error("call failed with status {0}")]
    Status(Status),

    /// The connection failed before the call completed.
    #[error("transport failure: {0}")]
    Transport(#[from] Error),
}

impl CallError {
    /// The terminal status, if this is a status failure.
    pub fn status(&self) -> Option<&Status> {
        match self {
            CallError::Status(s) => Some(s),
            CallError::Transport(_) => None,
        }
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        CallError::Status(status)
    }
}
