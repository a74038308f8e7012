//! Transport- and protocol-level error types.
//!
//! These describe failures of the connection itself (broken pipe, malformed
//! frames, handshake problems). Failures of an individual call are a
//! [`Status`](crate::Status) and travel inside the protocol instead; the two
//! classes are kept apart all the way up through [`CallError`](crate::CallError).

use thiserror::Error;

/// Main error type for connection-level operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (invalid frame, reserved bits, oversized payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer never completed the schema handshake.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Method name is not present in the peer's schema.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Connection closed while frames were still expected.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using the connection-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
