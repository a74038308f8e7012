//! Frame struct with typed accessors.
//!
//! A complete protocol frame: decoded header plus payload. Payloads are
//! `bytes::Bytes` so routing a frame into a per-call queue never copies.

use bytes::Bytes;

use super::wire_format::{flags, Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get the method ID.
    #[inline]
    pub fn method_id(&self) -> u16 {
        self.header.method_id
    }

    /// Get the call ID.
    #[inline]
    pub fn call_id(&self) -> u32 {
        self.header.call_id
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this frame travels server -> client.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_RESPONSE)
    }

    /// Check if the payload carries a stream message.
    #[inline]
    pub fn is_data(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_DATA)
    }

    /// Check if this frame half-closes its direction.
    #[inline]
    pub fn is_end_stream(&self) -> bool {
        flags::has_flag(self.header.flags, flags::END_STREAM)
    }

    /// Check if this is a cancellation frame.
    #[inline]
    pub fn is_cancel(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_CANCEL)
    }

    /// Check if this is the server's schema handshake frame.
    #[inline]
    pub fn is_hello(&self) -> bool {
        self.header.is_hello()
    }
}

/// Build a complete frame as a single byte vector (header + payload).
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
