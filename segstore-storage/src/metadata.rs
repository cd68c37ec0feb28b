//! Chunk metadata store.
//!
//! Maps a segment name to its ordered list of chunks. The chunked layout
//! needs it; the rolling layout keeps the same information in-band.
//!
//! One store is shared by every container's engine, so updates are
//! versioned: [`ChunkMetadataStore::update`] only succeeds when the caller
//! saw the latest version.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, StorageError};
use crate::traits::SegmentProperties;

/// One chunk of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Chunk name in the driver's namespace
    pub name: String,
    /// Segment offset of the chunk's first byte
    pub start_offset: u64,
    /// Bytes in the chunk
    pub length: u64,
    /// Segment that created the chunk. Survives concat, so a relinked chunk
    /// keeps its source's name here.
    #[serde(default)]
    pub created_by: String,
    /// Epoch of the engine that created the chunk
    #[serde(default)]
    pub created_epoch: u64,
}

impl ChunkMetadata {
    /// Segment offset one past the chunk's last byte.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Metadata of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Segment name
    pub name: String,
    /// Total bytes written
    pub length: u64,
    /// First readable offset
    pub start_offset: u64,
    /// Whether the segment is sealed
    pub sealed: bool,
    /// Epoch of the container instance that owns the segment
    pub owner_epoch: u64,
    /// Maximum bytes per chunk for this segment
    pub max_rolling_length: u64,
    /// Chunks in offset order
    pub chunks: Vec<ChunkMetadata>,
    /// Store version, bumped on every update
    pub version: u64,
}

impl SegmentMetadata {
    /// Metadata of a new, empty segment.
    pub fn new(name: impl Into<String>, max_rolling_length: u64, owner_epoch: u64) -> Self {
        Self {
            name: name.into(),
            length: 0,
            start_offset: 0,
            sealed: false,
            owner_epoch,
            max_rolling_length,
            chunks: Vec::new(),
            version: 0,
        }
    }

    /// Last chunk, if any.
    pub fn last_chunk(&self) -> Option<&ChunkMetadata> {
        self.chunks.last()
    }

    /// Segment properties view.
    pub fn properties(&self) -> SegmentProperties {
        SegmentProperties {
            name: self.name.clone(),
            length: self.length,
            start_offset: self.start_offset,
            sealed: self.sealed,
        }
    }
}

/// Store of segment metadata shared by all containers.
#[async_trait]
pub trait ChunkMetadataStore: Send + Sync {
    /// Get metadata of a segment.
    async fn get(&self, segment: &str) -> Result<Option<SegmentMetadata>>;

    /// Insert metadata of a new segment.
    ///
    /// Returns the stored record (with its version).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the segment is known.
    async fn create(&self, metadata: SegmentMetadata) -> Result<SegmentMetadata>;

    /// Replace metadata of an existing segment.
    ///
    /// `metadata.version` must match the stored version. Returns the stored
    /// record with its new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::MetadataConflict` if another writer updated the
    /// segment first, `StorageError::NotFound` if it was deleted.
    async fn update(&self, metadata: SegmentMetadata) -> Result<SegmentMetadata>;

    /// Remove metadata of a segment.
    ///
    /// No-op if the segment is unknown (idempotent).
    async fn delete(&self, segment: &str) -> Result<()>;

    /// Names of all known segments, sorted.
    async fn segment_names(&self) -> Result<Vec<String>>;
}

/// Metadata store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    segments: RwLock<HashMap<String, SegmentMetadata>>,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored segments.
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

#[async_trait]
impl ChunkMetadataStore for InMemoryMetadataStore {
    async fn get(&self, segment: &str) -> Result<Option<SegmentMetadata>> {
        Ok(self.segments.read().get(segment).cloned())
    }

    async fn create(&self, mut metadata: SegmentMetadata) -> Result<SegmentMetadata> {
        let mut segments = self.segments.write();
        if segments.contains_key(&metadata.name) {
            return Err(StorageError::AlreadyExists(metadata.name));
        }
        metadata.version = 1;
        segments.insert(metadata.name.clone(), metadata.clone());
        Ok(metadata)
    }

    async fn update(&self, mut metadata: SegmentMetadata) -> Result<SegmentMetadata> {
        let mut segments = self.segments.write();
        let stored = segments
            .get_mut(&metadata.name)
            .ok_or_else(|| StorageError::NotFound(metadata.name.clone()))?;

        if stored.version != metadata.version {
            return Err(StorageError::MetadataConflict {
                segment: metadata.name,
                expected: metadata.version,
                actual: stored.version,
            });
        }
        metadata.version += 1;
        *stored = metadata.clone();
        Ok(metadata)
    }

    async fn delete(&self, segment: &str) -> Result<()> {
        self.segments.write().remove(segment);
        Ok(())
    }

    async fn segment_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.segments.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryMetadataStore::new();
        let created = store
            .create(SegmentMetadata::new("seg", u64::MAX, 1))
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let loaded = store.get("seg").await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let store = InMemoryMetadataStore::new();
        store
            .create(SegmentMetadata::new("seg", u64::MAX, 1))
            .await
            .unwrap();
        let result = store.create(SegmentMetadata::new("seg", u64::MAX, 2)).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_detects_conflict() {
        let store = InMemoryMetadataStore::new();
        let created = store
            .create(SegmentMetadata::new("seg", u64::MAX, 1))
            .await
            .unwrap();

        let mut first = created.clone();
        first.length = 10;
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.version, 2);

        // Second writer still holds version 1
        let mut stale = created;
        stale.length = 5;
        let result = store.update(stale).await;
        assert!(matches!(
            result,
            Err(StorageError::MetadataConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));

        assert_eq!(store.get("seg").await.unwrap().unwrap().length, 10);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = InMemoryMetadataStore::new();
        let result = store.update(SegmentMetadata::new("gone", u64::MAX, 1)).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_and_names() {
        let store = InMemoryMetadataStore::new();
        for name in ["b", "a", "c"] {
            store
                .create(SegmentMetadata::new(name, u64::MAX, 1))
                .await
                .unwrap();
        }
        store.delete("b").await.unwrap();
        store.delete("b").await.unwrap();

        assert_eq!(store.segment_names().await.unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn test_chunk_end_offset() {
        let chunk = ChunkMetadata {
            name: "c".to_string(),
            start_offset: 100,
            length: 20,
            created_by: "seg".to_string(),
            created_epoch: 3,
        };
        assert_eq!(chunk.end_offset(), 120);
    }

    #[test]
    fn test_chunk_creator_defaults_when_absent() {
        let chunk: ChunkMetadata =
            serde_json::from_str(r#"{"name":"c","start_offset":0,"length":4}"#).unwrap();
        assert_eq!(chunk.created_by, "");
        assert_eq!(chunk.created_epoch, 0);
    }
}
