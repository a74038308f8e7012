//! Wire format encoding and decoding.
//!
//! Every frame starts with an 11-byte header:
//! ```text
//! ┌──────────┬───────┬──────────┬──────────┐
//! │ Method ID│ Flags │ Call ID  │ Length   │
//! │ 2 bytes  │ 1 byte│ 4 bytes  │ 4 bytes  │
//! │ uint16 BE│       │ uint32 BE│ uint32 BE│
//! └──────────┴───────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Call IDs are client-assigned and
//! nonzero; call ID 0 with method ID 0 is the server's HELLO/schema frame.

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 11).
pub const HEADER_SIZE: usize = 11;

/// Default maximum payload size (16 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Reserved method ID for the server's schema handshake frame.
pub const HELLO_METHOD_ID: u16 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Direction: server to client (1) or client to server (0).
    pub const IS_RESPONSE: u8 = 0b0000_0001;
    /// Payload carries one message on the stream.
    pub const IS_DATA: u8 = 0b0000_0010;
    /// Half-close marker for the sender's direction. From the client this is
    /// close-send (empty payload); from the server it is the call trailer and
    /// the payload is the encoded terminal `Status`.
    pub const END_STREAM: u8 = 0b0000_0100;
    /// Client-initiated abort; payload is the encoded reason `Status`
    /// (`Cancelled` or `DeadlineExceeded`).
    pub const IS_CANCEL: u8 = 0b0000_1000;

    /// Reserved bits mask (bits 4-7).
    pub const RESERVED_MASK: u8 = 0b1111_0000;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    // Frame kinds as flag combinations

    /// Request message: client -> server.
    pub const REQUEST_DATA: u8 = IS_DATA;
    /// Close-send half-close: client -> server, empty payload. 0x04
    pub const CLOSE_SEND: u8 = END_STREAM;
    /// Cancellation: client -> server, payload = reason status. 0x08
    pub const CANCEL: u8 = IS_CANCEL;
    /// Response message: server -> client. 0x03
    pub const RESPONSE_DATA: u8 = IS_RESPONSE | IS_DATA;
    /// Trailer: server -> client, payload = terminal status. 0x05
    pub const TRAILER: u8 = IS_RESPONSE | END_STREAM;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Method identifier from the schema (0 reserved for HELLO).
    pub method_id: u16,
    /// Flags byte (see the `flags` module).
    pub flags: u8,
    /// Call identifier, client-assigned, nonzero (0 = handshake).
    pub call_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(method_id: u16, flags: u8, call_id: u32, payload_length: u32) -> Self {
        Self {
            method_id,
            flags,
            call_id,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.method_id.to_be_bytes());
        buf[2] = self.flags;
        buf[3..7].copy_from_slice(&self.call_id.to_be_bytes());
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            method_id: u16::from_be_bytes([buf[0], buf[1]]),
            flags: buf[2],
            call_id: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
            payload_length: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks that reserved flag bits are zero, the payload fits the limit,
    /// and call ID 0 is only used by the handshake frame.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(Error::Protocol(
                "reserved flag bits must be 0".to_string(),
            ));
        }

        if self.payload_length > max_payload_size {
            return Err(Error::Protocol(format!(
                "payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.call_id == 0 && self.method_id != HELLO_METHOD_ID {
            return Err(Error::Protocol(
                "call ID 0 is reserved for the handshake".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if this frame travels server -> client.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    /// Check if the payload carries a stream message.
    #[inline]
    pub fn is_data(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_DATA)
    }

    /// Check if this frame half-closes its direction.
    #[inline]
    pub fn is_end_stream(&self) -> bool {
        flags::has_flag(self.flags, flags::END_STREAM)
    }

    /// Check if this is a cancellation frame.
    #[inline]
    pub fn is_cancel(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_CANCEL)
    }

    /// Check if this is the server's schema handshake frame.
    #[inline]
    pub fn is_hello(&self) -> bool {
        self.call_id == 0 && self.method_id == HELLO_METHOD_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(3, flags::RESPONSE_DATA, 42, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header::new(0x0102, 0x03, 0x04050607, 0x08090A0B);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 0x02);
        assert_eq!(bytes[2], 0x03);
        assert_eq!(&bytes[3..7], &[0x04, 0x05, 0x06, 0x07]);
        assert_eq!(&bytes[7..11], &[0x08, 0x09, 0x0A, 0x0B]);
    }

    #[test]
    fn test_header_size_is_exactly_11() {
        assert_eq!(HEADER_SIZE, 11);
        let header = Header::new(1, 0, 1, 0);
        assert_eq!(header.encode().len(), 11);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 10];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(1, 0b1000_0000, 1, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(1, flags::REQUEST_DATA, 1, 1_000_000);
        assert!(header.validate(100).is_err());
    }

    #[test]
    fn test_validate_call_id_zero_reserved() {
        let rogue = Header::new(7, flags::REQUEST_DATA, 0, 0);
        assert!(rogue.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        let hello = Header::new(HELLO_METHOD_ID, flags::RESPONSE_DATA, 0, 16);
        assert!(hello.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        assert!(hello.is_hello());
    }

    #[test]
    fn test_frame_kind_flag_values() {
        assert_eq!(flags::REQUEST_DATA, 0x02);
        assert_eq!(flags::CLOSE_SEND, 0x04);
        assert_eq!(flags::CANCEL, 0x08);
        assert_eq!(flags::RESPONSE_DATA, 0x03);
        assert_eq!(flags::TRAILER, 0x05);
    }

    #[test]
    fn test_header_accessors() {
        let trailer = Header::new(1, flags::TRAILER, 9, 0);
        assert!(trailer.is_response());
        assert!(trailer.is_end_stream());
        assert!(!trailer.is_data());
        assert!(!trailer.is_cancel());

        let cancel = Header::new(1, flags::CANCEL, 9, 0);
        assert!(cancel.is_cancel());
        assert!(!cancel.is_response());
    }
}
