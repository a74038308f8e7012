//! Document store abstraction.
//!
//! Services that persist data talk to a [`Collection`]: a keyed bag of
//! opaque document bodies addressed by [`DocumentId`]. The trait is the seam
//! between service logic and storage; handlers translate [`StoreError`] and
//! lookup misses into call statuses, the store itself knows nothing about
//! the protocol.

mod memory;

pub use memory::MemoryCollection;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// 12-byte document identifier, rendered as 24 hex characters.
///
/// Layout: 4-byte creation timestamp, 5 process-scoped random bytes, 3-byte
/// counter. Lexicographic order therefore roughly follows insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId([u8; 12]);

/// The identifier string was not 24 hex characters.
#[derive(Debug, Error)]
#[error("cannot parse document ID {0:?}")]
pub struct ParseIdError(String);

impl DocumentId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        static PROCESS_RANDOM: OnceLock<[u8; 5]> = OnceLock::new();
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let random = PROCESS_RANDOM.get_or_init(|| {
            // seeded once per process from clock jitter and address entropy
            let seed = now.as_nanos() as u64 ^ (&COUNTER as *const _ as u64);
            let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
            x ^= x >> 32;
            x = x.wrapping_mul(0xD6E8_FEB8_6659_FD93);
            x ^= x >> 32;
            let b = x.to_be_bytes();
            [b[0], b[1], b[2], b[3], b[4]]
        });
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&(now.as_secs() as u32).to_be_bytes());
        bytes[4..9].copy_from_slice(random);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// The raw 12 bytes.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for DocumentId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 24 || !s.is_ascii() {
            return Err(ParseIdError(s.to_string()));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_value(chunk[0]).ok_or_else(|| ParseIdError(s.to_string()))?;
            let lo = hex_value(chunk[1]).ok_or_else(|| ParseIdError(s.to_string()))?;
            bytes[i] = hi << 4 | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// One stored document: identifier plus opaque body bytes.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub body: Bytes,
}

/// A keyed collection of documents.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Insert a new document, returning its generated identifier.
    async fn insert_one(&self, body: Bytes) -> std::result::Result<DocumentId, StoreError>;

    /// Fetch the document with the given identifier.
    async fn find_one(&self, id: DocumentId)
        -> std::result::Result<Option<Document>, StoreError>;

    /// Replace the body of an existing document. Returns the number of
    /// documents matched (0 or 1).
    async fn replace_one(
        &self,
        id: DocumentId,
        body: Bytes,
    ) -> std::result::Result<u64, StoreError>;

    /// Delete the document with the given identifier. Returns the number of
    /// documents deleted (0 or 1).
    async fn delete_one(&self, id: DocumentId) -> std::result::Result<u64, StoreError>;

    /// Open a cursor over every document in the collection.
    async fn find_cursor(&self) -> std::result::Result<Cursor, StoreError>;
}

/// Backend iteration state behind a [`Cursor`].
#[async_trait]
pub(crate) trait CursorSource: Send {
    async fn next(&mut self) -> std::result::Result<Option<Document>, StoreError>;
}

/// Forward-only cursor over a collection.
///
/// Finite; dropping it releases whatever the backend holds for it.
pub struct Cursor {
    source: Box<dyn CursorSource>,
}

impl Cursor {
    pub(crate) fn new(source: Box<dyn CursorSource>) -> Self {
        Self { source }
    }

    /// Advance to the next document, `Ok(None)` once exhausted.
    pub async fn next(&mut self) -> std::result::Result<Option<Document>, StoreError> {
        self.source.next().await
    }
}
