//! Persistence collaborator for graph documents.
//!
//! The engine only needs fetch/save/create/delete. Two implementations:
//! [`MemoryGraphStore`] for tests and embedding, [`FsGraphStore`] keeping
//! one pretty-printed JSON file per graph in a directory.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use thiserror::Error;

use crate::document::GraphDocument;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document with this id.
    #[error("graph '{id}' not found")]
    NotFound {
        /// Graph id
        id: String,
    },

    /// A document with this id already exists.
    #[error("graph '{id}' already exists")]
    AlreadyExists {
        /// Graph id
        id: String,
    },

    /// Id cannot be used as a storage key.
    #[error("invalid graph id '{id}'")]
    InvalidId {
        /// Graph id
        id: String,
    },

    /// Filesystem error.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Load/save interface for graph documents.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Every stored document, ordered by id.
    async fn fetch_all(&self) -> Result<Vec<GraphDocument>, StoreError>;

    /// Overwrite an existing document.
    async fn save(&self, document: GraphDocument) -> Result<GraphDocument, StoreError>;

    /// Store a new document.
    async fn create(&self, document: GraphDocument) -> Result<GraphDocument, StoreError>;

    /// Remove a document.
    async fn delete(&self, document: &GraphDocument) -> Result<(), StoreError>;
}

/// Whether `id` is usable as a storage key (and file stem).
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id.chars().all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if is_valid_id(id) { Ok(()) } else { Err(StoreError::InvalidId { id: id.to_string() }) }
}

/// In-memory store. Documents are kept as JSON text so every load goes
/// through deserialization, like a real backend.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryGraphStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn fetch_all(&self) -> Result<Vec<GraphDocument>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .values()
            .map(|text| GraphDocument::from_json(text).map_err(StoreError::from))
            .collect()
    }

    async fn save(&self, document: GraphDocument) -> Result<GraphDocument, StoreError> {
        check_id(&document.id)?;
        let text = serde_json::to_string(&document)?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let slot = documents
            .get_mut(&document.id)
            .ok_or_else(|| StoreError::NotFound { id: document.id.clone() })?;
        *slot = text;
        Ok(document)
    }

    async fn create(&self, document: GraphDocument) -> Result<GraphDocument, StoreError> {
        check_id(&document.id)?;
        let text = serde_json::to_string(&document)?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if documents.contains_key(&document.id) {
            return Err(StoreError::AlreadyExists { id: document.id });
        }
        documents.insert(document.id.clone(), text);
        Ok(document)
    }

    async fn delete(&self, document: &GraphDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents
            .remove(&document.id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound { id: document.id.clone() })
    }
}

/// Directory of `<id>.json` files.
#[derive(Debug, Clone)]
pub struct FsGraphStore {
    dir: PathBuf,
}

impl FsGraphStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn write(&self, path: &Path, document: &GraphDocument) -> Result<(), StoreError> {
        let text = document.to_json_pretty()?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FsGraphStore {
    async fn fetch_all(&self) -> Result<Vec<GraphDocument>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let text = tokio::fs::read_to_string(&path).await?;
                documents.push(GraphDocument::from_json(&text)?);
            }
        }
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn save(&self, document: GraphDocument) -> Result<GraphDocument, StoreError> {
        let path = self.path_for(&document.id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound { id: document.id });
        }
        self.write(&path, &document).await?;
        tracing::debug!(graph = %document.id, path = %path.display(), "graph saved");
        Ok(document)
    }

    async fn create(&self, document: GraphDocument) -> Result<GraphDocument, StoreError> {
        let path = self.path_for(&document.id)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists { id: document.id });
        }
        self.write(&path, &document).await?;
        tracing::debug!(graph = %document.id, path = %path.display(), "graph created");
        Ok(document)
    }

    async fn delete(&self, document: &GraphDocument) -> Result<(), StoreError> {
        let path = self.path_for(&document.id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound { id: document.id.clone() })
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn id_validation() {
        assert!(is_valid_id("My Network_1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(".."));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("a\\b"));
    }

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryGraphStore::new();
        store.create(GraphDocument::empty("b")).await.unwrap();
        store.create(GraphDocument::empty("a")).await.unwrap();
        assert!(matches!(
            store.create(GraphDocument::empty("a")).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        let ids: Vec<String> = store.fetch_all().await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let missing = store.save(GraphDocument::empty("c")).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        store.delete(&GraphDocument::empty("a")).await.unwrap();
        let deleted = store.delete(&GraphDocument::empty("a")).await;
        assert!(matches!(deleted, Err(StoreError::NotFound { .. })));
        assert_eq!(store.len(), 1);
    }
}
