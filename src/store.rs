//! Per-user storage of LaTeX documents.
//!
//! Every operation takes the owner's user id. A record that does not exist
//! and a record that belongs to someone else are both [`MonogramError::NotFound`],
//! so callers cannot discover other users' ids.

use crate::clock::Clock;
use crate::error::MonogramError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Largest page size accepted by [`DocumentStore::list_recent`].
pub const MAX_LIST_LIMIT: usize = 50;

/// A stored LaTeX document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TexDocument {
    pub id: Uuid,
    pub owner_id: String,
    pub filename: String,
    pub latex: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The listing view of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
}

impl From<&TexDocument> for DocumentSummary {
    fn from(doc: &TexDocument) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            created_at: doc.created_at,
        }
    }
}

/// Fields to change on update. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPatch {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub latex: Option<String>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.latex.is_none()
    }
}

/// Owner-scoped document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The owner's most recent documents, newest first. `limit` is clamped
    /// to `1..=MAX_LIST_LIMIT`.
    async fn list_recent(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<DocumentSummary>, MonogramError>;

    async fn get(&self, owner_id: &str, id: Uuid) -> Result<TexDocument, MonogramError>;

    async fn create(
        &self,
        owner_id: &str,
        filename: &str,
        latex: &str,
    ) -> Result<TexDocument, MonogramError>;

    /// Apply `patch` and bump `updated_at`.
    async fn update(
        &self,
        owner_id: &str,
        id: Uuid,
        patch: DocumentPatch,
    ) -> Result<TexDocument, MonogramError>;

    async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), MonogramError>;
}

struct Entry {
    doc: TexDocument,
    // insertion order, breaks created_at ties
    seq: u64,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

/// In-process [`DocumentStore`], used by tests and the CLI.
pub struct MemoryDocumentStore {
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl MemoryDocumentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of documents across all owners.
    pub async fn len(&self) -> usize {
        self.inner.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_recent(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<DocumentSummary>, MonogramError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let inner = self.inner.read().await;

        let mut owned: Vec<&Entry> = inner
            .docs
            .values()
            .filter(|e| e.doc.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| {
            b.doc
                .created_at
                .cmp(&a.doc.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(owned
            .into_iter()
            .take(limit)
            .map(|e| DocumentSummary::from(&e.doc))
            .collect())
    }

    async fn get(&self, owner_id: &str, id: Uuid) -> Result<TexDocument, MonogramError> {
        let inner = self.inner.read().await;
        inner
            .docs
            .get(&id)
            .filter(|e| e.doc.owner_id == owner_id)
            .map(|e| e.doc.clone())
            .ok_or(MonogramError::NotFound)
    }

    async fn create(
        &self,
        owner_id: &str,
        filename: &str,
        latex: &str,
    ) -> Result<TexDocument, MonogramError> {
        let now = self.clock.now();
        let doc = TexDocument {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            filename: filename.to_string(),
            latex: latex.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.docs.insert(
            doc.id,
            Entry {
                doc: doc.clone(),
                seq,
            },
        );
        debug!("Stored document {} ({} bytes)", doc.id, doc.latex.len());
        Ok(doc)
    }

    async fn update(
        &self,
        owner_id: &str,
        id: Uuid,
        patch: DocumentPatch,
    ) -> Result<TexDocument, MonogramError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let entry = inner
            .docs
            .get_mut(&id)
            .filter(|e| e.doc.owner_id == owner_id)
            .ok_or(MonogramError::NotFound)?;

        if let Some(filename) = patch.filename {
            entry.doc.filename = filename;
        }
        if let Some(latex) = patch.latex {
            entry.doc.latex = latex;
        }
        entry.doc.updated_at = now;
        Ok(entry.doc.clone())
    }

    async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), MonogramError> {
        let mut inner = self.inner.write().await;
        match inner.docs.get(&id) {
            Some(e) if e.doc.owner_id == owner_id => {
                inner.docs.remove(&id);
                debug!("Deleted document {}", id);
                Ok(())
            }
            _ => Err(MonogramError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn store() -> (Arc<ManualClock>, MemoryDocumentStore) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let store = MemoryDocumentStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn lists_newest_first_with_limit() {
        let (clock, store) = store();
        for name in ["a.tex", "b.tex", "c.tex"] {
            store.create("alice", name, "x").await.unwrap();
            clock.advance(Duration::seconds(1));
        }
        store.create("bob", "other.tex", "y").await.unwrap();

        let names: Vec<_> = store
            .list_recent("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.filename)
            .collect();
        assert_eq!(names, ["c.tex", "b.tex", "a.tex"]);

        assert_eq!(store.list_recent("alice", 2).await.unwrap().len(), 2);
        // clamped up to one
        assert_eq!(store.list_recent("alice", 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_instant_keeps_insertion_order() {
        let (_clock, store) = store();
        store.create("alice", "first.tex", "").await.unwrap();
        store.create("alice", "second.tex", "").await.unwrap();

        let list = store.list_recent("alice", 10).await.unwrap();
        assert_eq!(list[0].filename, "second.tex");
        assert_eq!(list[1].filename, "first.tex");
    }

    #[tokio::test]
    async fn foreign_documents_are_not_found() {
        let (_clock, store) = store();
        let doc = store.create("alice", "notes.tex", "secret").await.unwrap();

        assert!(matches!(store.get("bob", doc.id).await, Err(MonogramError::NotFound)));
        assert!(matches!(
            store
                .update("bob", doc.id, DocumentPatch {
                    latex: Some("mine now".into()),
                    ..Default::default()
                })
                .await,
            Err(MonogramError::NotFound)
        ));
        assert!(matches!(store.delete("bob", doc.id).await, Err(MonogramError::NotFound)));
        assert!(store.list_recent("bob", 10).await.unwrap().is_empty());

        let still = store.get("alice", doc.id).await.unwrap();
        assert_eq!(still.latex, "secret");
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let (_clock, store) = store();
        assert!(matches!(
            store.get("alice", Uuid::new_v4()).await,
            Err(MonogramError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_touches_only_given_fields() {
        let (clock, store) = store();
        let doc = store.create("alice", "notes.tex", "old").await.unwrap();
        clock.advance(Duration::minutes(5));

        let updated = store
            .update("alice", doc.id, DocumentPatch {
                latex: Some("new".into()),
                filename: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.filename, "notes.tex");
        assert_eq!(updated.latex, "new");
        assert_eq!(updated.created_at, doc.created_at);
        assert_eq!(updated.updated_at - doc.updated_at, Duration::minutes(5));
    }

    #[tokio::test]
    async fn delete_removes() {
        let (_clock, store) = store();
        let doc = store.create("alice", "notes.tex", "x").await.unwrap();
        store.delete("alice", doc.id).await.unwrap();
        assert!(store.is_empty().await);
        assert!(matches!(store.delete("alice", doc.id).await, Err(MonogramError::NotFound)));
    }
}
