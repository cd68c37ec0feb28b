//! Chunked segment storage engine.
//!
//! A segment is an ordered list of chunks recorded in a
//! [`ChunkMetadataStore`]. Data lives in chunks on a [`ChunkStorage`] driver;
//! the engine itself is backend-agnostic.
//!
//! ```text
//!  segment "scope/stream/0"            metadata store
//!  ┌──────────┬──────────┬───────┐     ┌──────────────────────────────┐
//!  │ chunk A  │ chunk B  │ chunk │ ◄── │ name, length, start_offset,  │
//!  │ 0..4096  │ 4096..   │ C ... │     │ sealed, [A, B, C], version   │
//!  └──────────┴──────────┴───────┘     └──────────────────────────────┘
//! ```
//!
//! # Writes
//!
//! When the driver supports append, a write first fills the last chunk (if
//! this epoch created it) up to the segment's rolling length; the rest goes
//! into new chunks. Object stores never append, so every write lands in
//! fresh chunks.
//!
//! # Concat
//!
//! Concatenation relinks the source's chunk list onto the target. No data
//! is copied.
//!
//! One engine instance exists per container.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ChunkedSegmentStorageConfig;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::locks::SegmentLocks;
use crate::metadata::{ChunkMetadata, ChunkMetadataStore, SegmentMetadata};
use crate::traits::{
    ChunkHandle, ChunkStorage, SegmentHandle, SegmentProperties, SegmentRollingPolicy, Storage,
};

/// Identifier of a container, the unit of segment isolation.
pub type ContainerId = u32;

/// Segment storage built from chunks and external metadata.
pub struct ChunkedSegmentStorage {
    container_id: ContainerId,
    chunk_storage: Arc<dyn ChunkStorage>,
    metadata_store: Arc<dyn ChunkMetadataStore>,
    config: ChunkedSegmentStorageConfig,
    executor: ExecutionContext,
    epoch: AtomicU64,
    locks: SegmentLocks,
}

impl ChunkedSegmentStorage {
    /// Create an engine for one container.
    pub fn new(
        container_id: ContainerId,
        chunk_storage: Arc<dyn ChunkStorage>,
        metadata_store: Arc<dyn ChunkMetadataStore>,
        config: ChunkedSegmentStorageConfig,
        executor: ExecutionContext,
    ) -> Self {
        info!(
            container_id,
            driver = chunk_storage.driver_name(),
            "Creating chunked segment storage"
        );
        Self {
            container_id,
            chunk_storage,
            metadata_store,
            config,
            executor,
            epoch: AtomicU64::new(0),
            locks: SegmentLocks::new(),
        }
    }

    /// Container this engine serves.
    pub fn container_id(&self) -> ContainerId {
        self.container_id
    }

    /// Driver holding the chunks.
    pub fn chunk_storage(&self) -> &Arc<dyn ChunkStorage> {
        &self.chunk_storage
    }

    /// Metadata store holding the chunk lists.
    pub fn metadata_store(&self) -> &Arc<dyn ChunkMetadataStore> {
        &self.metadata_store
    }

    /// Engine configuration.
    pub fn config(&self) -> &ChunkedSegmentStorageConfig {
        &self.config
    }

    /// Execution context the engine was built with.
    pub fn executor(&self) -> &ExecutionContext {
        &self.executor
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn load(&self, segment: &str) -> Result<SegmentMetadata> {
        self.metadata_store
            .get(segment)
            .await?
            .ok_or_else(|| StorageError::NotFound(segment.to_string()))
    }

    fn check_owner(&self, metadata: &SegmentMetadata) -> Result<()> {
        let epoch = self.epoch();
        if metadata.owner_epoch > epoch {
            return Err(StorageError::ReadOnly(format!(
                "{} is owned by epoch {} (this instance runs epoch {})",
                metadata.name, metadata.owner_epoch, epoch
            )));
        }
        Ok(())
    }

    fn check_writable(handle: &SegmentHandle) -> Result<()> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.segment_name.clone()));
        }
        Ok(())
    }

    fn new_chunk_name(&self, segment: &str, offset: u64) -> String {
        format!("{}.E-{}-O-{}.{}", segment, self.epoch(), offset, Uuid::new_v4())
    }

    fn rolling_length(&self, metadata: &SegmentMetadata) -> u64 {
        metadata
            .max_rolling_length
            .min(self.config.max_chunk_size)
            .max(1)
    }

    /// Delete chunks no segment references any more.
    ///
    /// Best-effort: failures are logged and leave orphaned chunks.
    async fn delete_chunks(&self, names: Vec<String>) {
        let deletes = names.into_iter().map(|name| async move {
            let handle = ChunkHandle::writable(name);
            if let Err(e) = self.chunk_storage.delete(&handle).await {
                warn!(
                    container_id = self.container_id,
                    chunk = %handle.chunk_name,
                    "Failed to delete chunk: {}", e
                );
            }
        });
        futures::future::join_all(deletes).await;
    }

    /// Whether the last chunk can take more bytes in place.
    ///
    /// Only chunks this segment created in this epoch qualify, and only when
    /// the driver agrees with the recorded length. A write that failed after
    /// appending leaves the chunk longer than its metadata.
    async fn can_extend(&self, metadata: &SegmentMetadata, chunk: &ChunkMetadata) -> Result<bool> {
        if chunk.created_by != metadata.name || chunk.created_epoch != self.epoch() {
            return Ok(false);
        }
        let stored = self.chunk_storage.get_info(&chunk.name).await?.length;
        if stored != chunk.length {
            debug!(
                "Chunk {} holds {} bytes but {} are recorded, rolling over",
                chunk.name, stored, chunk.length
            );
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl Storage for ChunkedSegmentStorage {
    async fn initialize(&self, epoch: u64) -> Result<()> {
        let current = self.epoch();
        if epoch < current {
            return Err(StorageError::InvalidArgument(format!(
                "Epoch {} is older than current epoch {}",
                epoch, current
            )));
        }
        self.epoch.store(epoch, Ordering::SeqCst);
        debug!(container_id = self.container_id, epoch, "Initialized");
        Ok(())
    }

    #[instrument(skip(self), fields(container = self.container_id))]
    async fn create(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle> {
        let rolling_length = if policy == SegmentRollingPolicy::NO_ROLLING {
            self.config.default_rolling_length
        } else {
            policy.max_length
        };
        let metadata = SegmentMetadata::new(segment, rolling_length, self.epoch());
        self.metadata_store.create(metadata).await?;
        debug!("Created segment {}", segment);
        Ok(SegmentHandle::writable(segment))
    }

    #[instrument(skip(self), fields(container = self.container_id))]
    async fn open_write(&self, segment: &str) -> Result<SegmentHandle> {
        let _guard = self.locks.lock(segment).await;
        let mut metadata = self.load(segment).await?;
        self.check_owner(&metadata)?;

        let epoch = self.epoch();
        if metadata.owner_epoch < epoch {
            debug!(
                "Taking ownership of {} from epoch {}",
                segment, metadata.owner_epoch
            );
            metadata.owner_epoch = epoch;
            self.metadata_store.update(metadata).await?;
        }
        Ok(SegmentHandle::writable(segment))
    }

    async fn open_read(&self, segment: &str) -> Result<SegmentHandle> {
        self.load(segment).await?;
        Ok(SegmentHandle::read_only(segment))
    }

    #[instrument(skip(self, handle), fields(container = self.container_id, segment = %handle.segment_name))]
    async fn read(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes> {
        let metadata = self.load(&handle.segment_name).await?;

        if offset < metadata.start_offset {
            return Err(StorageError::InvalidArgument(format!(
                "Offset {} of {} is below truncation offset {}",
                offset, metadata.name, metadata.start_offset
            )));
        }
        let end = offset.saturating_add(length as u64);
        if end > metadata.length {
            return Err(StorageError::InvalidArgument(format!(
                "Read of {}..{} past end of {} ({} bytes)",
                offset, end, metadata.name, metadata.length
            )));
        }
        if length == 0 {
            return Ok(Bytes::new());
        }

        let mut buffer = BytesMut::with_capacity(length);
        for chunk in &metadata.chunks {
            if chunk.end_offset() <= offset || chunk.start_offset >= end {
                continue;
            }
            let from = offset.max(chunk.start_offset);
            let to = end.min(chunk.end_offset());
            let chunk_handle = ChunkHandle::read_only(chunk.name.clone());
            let data = self
                .chunk_storage
                .read(&chunk_handle, from - chunk.start_offset, (to - from) as usize)
                .await?;
            buffer.extend_from_slice(&data);
        }
        Ok(buffer.freeze())
    }

    #[instrument(skip(self, handle, data), fields(container = self.container_id, segment = %handle.segment_name, size = data.len()))]
    async fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut metadata = self.load(&handle.segment_name).await?;
        self.check_owner(&metadata)?;

        if metadata.sealed {
            return Err(StorageError::Sealed(metadata.name));
        }
        if offset != metadata.length {
            return Err(StorageError::BadOffset {
                name: metadata.name,
                expected: metadata.length,
                given: offset,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let max_length = self.rolling_length(&metadata);
        let mut remaining = data;

        let can_append = self.config.append_enabled && self.chunk_storage.supports_append();
        let mut room = 0;
        if can_append {
            if let Some(last) = metadata.chunks.last() {
                if self.can_extend(&metadata, last).await? {
                    room = max_length.saturating_sub(last.length);
                }
            }
        }
        if room > 0 {
            if let Some(last) = metadata.chunks.last_mut() {
                let take = room.min(remaining.len() as u64) as usize;
                let part = remaining.split_to(take);
                let chunk_handle = ChunkHandle::writable(last.name.clone());
                self.chunk_storage
                    .write(&chunk_handle, last.length, part)
                    .await?;
                last.length += take as u64;
                metadata.length += take as u64;
            }
        }

        let epoch = self.epoch();
        let mut created = Vec::new();
        let mut outcome = Ok(());
        while !remaining.is_empty() {
            let take = max_length.min(remaining.len() as u64) as usize;
            let part = remaining.split_to(take);
            let chunk_name = self.new_chunk_name(&metadata.name, metadata.length);
            debug!("Creating chunk {} ({} bytes)", chunk_name, take);
            created.push(chunk_name.clone());
            if let Err(e) = self.chunk_storage.create_with_content(&chunk_name, part).await {
                outcome = Err(e);
                break;
            }
            metadata.chunks.push(ChunkMetadata {
                name: chunk_name,
                start_offset: metadata.length,
                length: take as u64,
                created_by: metadata.name.clone(),
                created_epoch: epoch,
            });
            metadata.length += take as u64;
        }

        let unreferenced = if outcome.is_err() {
            true
        } else {
            match self.metadata_store.update(metadata).await {
                Ok(_) => false,
                // Only drop new chunks when the store surely did not record them
                Err(e @ (StorageError::MetadataConflict { .. } | StorageError::NotFound(_))) => {
                    outcome = Err(e);
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        };
        if unreferenced && !created.is_empty() {
            warn!("Write failed, removing {} new chunks", created.len());
            self.delete_chunks(created).await;
        }
        outcome
    }

    async fn get_info(&self, segment: &str) -> Result<SegmentProperties> {
        Ok(self.load(segment).await?.properties())
    }

    async fn exists(&self, segment: &str) -> Result<bool> {
        Ok(self.metadata_store.get(segment).await?.is_some())
    }

    #[instrument(skip(self, handle), fields(container = self.container_id, segment = %handle.segment_name))]
    async fn seal(&self, handle: &SegmentHandle) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut metadata = self.load(&handle.segment_name).await?;
        self.check_owner(&metadata)?;

        if metadata.sealed {
            return Ok(());
        }
        metadata.sealed = true;
        self.metadata_store.update(metadata).await?;
        debug!("Sealed");
        Ok(())
    }

    #[instrument(skip(self, target), fields(container = self.container_id, target = %target.segment_name))]
    async fn concat(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()> {
        Self::check_writable(target)?;
        let _guards = self.locks.lock_pair(&target.segment_name, source).await;

        let mut target_metadata = self.load(&target.segment_name).await?;
        let source_metadata = self.load(source).await?;
        self.check_owner(&target_metadata)?;

        if target_metadata.sealed {
            return Err(StorageError::Sealed(target_metadata.name));
        }
        if !source_metadata.sealed {
            return Err(StorageError::InvalidArgument(format!(
                "Concat source {} is not sealed",
                source
            )));
        }
        if source_metadata.start_offset != 0 {
            return Err(StorageError::InvalidArgument(format!(
                "Concat source {} is truncated",
                source
            )));
        }
        if offset != target_metadata.length {
            return Err(StorageError::BadOffset {
                name: target_metadata.name,
                expected: target_metadata.length,
                given: offset,
            });
        }

        let base = target_metadata.length;
        for chunk in &source_metadata.chunks {
            target_metadata.chunks.push(ChunkMetadata {
                start_offset: base + chunk.start_offset,
                ..chunk.clone()
            });
        }
        target_metadata.length += source_metadata.length;

        self.metadata_store.update(target_metadata).await?;
        self.metadata_store.delete(source).await?;
        debug!(
            "Concatenated {} ({} bytes, {} chunks)",
            source,
            source_metadata.length,
            source_metadata.chunks.len()
        );
        Ok(())
    }

    #[instrument(skip(self, handle), fields(container = self.container_id, segment = %handle.segment_name))]
    async fn delete(&self, handle: &SegmentHandle) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let metadata = self.load(&handle.segment_name).await?;
        self.check_owner(&metadata)?;

        self.metadata_store.delete(&metadata.name).await?;
        self.delete_chunks(metadata.chunks.into_iter().map(|c| c.name).collect())
            .await;
        debug!("Deleted");
        Ok(())
    }

    #[instrument(skip(self, handle), fields(container = self.container_id, segment = %handle.segment_name))]
    async fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()> {
        Self::check_writable(handle)?;
        let _guard = self.locks.lock(&handle.segment_name).await;
        let mut metadata = self.load(&handle.segment_name).await?;
        self.check_owner(&metadata)?;

        if offset > metadata.length {
            return Err(StorageError::BadOffset {
                name: metadata.name,
                expected: metadata.length,
                given: offset,
            });
        }
        if offset <= metadata.start_offset {
            return Ok(());
        }

        let (dropped, kept): (Vec<_>, Vec<_>) = metadata
            .chunks
            .into_iter()
            .partition(|chunk| chunk.end_offset() <= offset);
        metadata.chunks = kept;
        metadata.start_offset = offset;

        self.metadata_store.update(metadata).await?;
        self.delete_chunks(dropped.into_iter().map(|c| c.name).collect())
            .await;
        Ok(())
    }

    fn supports_truncation(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for ChunkedSegmentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSegmentStorage")
            .field("container_id", &self.container_id)
            .field("driver", &self.chunk_storage.driver_name())
            .field("epoch", &self.epoch())
            .finish()
    }
}
