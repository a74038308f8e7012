//! In-memory collection backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{Collection, Cursor, CursorSource, Document, DocumentId, StoreError};

/// A [`Collection`] held entirely in process memory.
///
/// Iteration order is by identifier, so cursors walk documents roughly in
/// insertion order. Cursors see a snapshot taken when they were opened.
#[derive(Default)]
pub struct MemoryCollection {
    docs: Arc<RwLock<BTreeMap<DocumentId, Bytes>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a document under a fixed identifier, bypassing generation.
    ///
    /// Test hook for seeding known IDs or intentionally corrupt bodies.
    pub async fn put_raw(&self, id: DocumentId, body: Bytes) {
        self.docs.write().await.insert(id, body);
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn insert_one(&self, body: Bytes) -> Result<DocumentId, StoreError> {
        let id = DocumentId::generate();
        self.docs.write().await.insert(id, body);
        Ok(id)
    }

    async fn find_one(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self
            .docs
            .read()
            .await
            .get(&id)
            .map(|body| Document {
                id,
                body: body.clone(),
            }))
    }

    async fn replace_one(&self, id: DocumentId, body: Bytes) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(&id) {
            Some(slot) => {
                *slot = body;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, id: DocumentId) -> Result<u64, StoreError> {
        match self.docs.write().await.remove(&id) {
            Some(_) => Ok(1),
            None => Ok(0),
        }
    }

    async fn find_cursor(&self) -> Result<Cursor, StoreError> {
        let snapshot: Vec<Document> = self
            .docs
            .read()
            .await
            .iter()
            .map(|(id, body)| Document {
                id: *id,
                body: body.clone(),
            })
            .collect();
        Ok(Cursor::new(Box::new(SnapshotCursor {
            docs: snapshot.into_iter(),
        })))
    }
}

struct SnapshotCursor {
    docs: std::vec::IntoIter<Document>,
}

#[async_trait]
impl CursorSource for SnapshotCursor {
    async fn next(&mut self) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.next())
    }
}
