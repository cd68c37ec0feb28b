//! Test doubles that fail on demand.

use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::memory::InMemoryChunkStorage;
use crate::metadata::{ChunkMetadataStore, InMemoryMetadataStore, SegmentMetadata};
use crate::traits::{ChunkHandle, ChunkInfo, ChunkStorage};

fn injected(op: &str, chunk: &str) -> StorageError {
    StorageError::Backend(format!("injected {} failure on {}", op, chunk))
}

/// In-memory driver whose creates and replaces can be made to fail.
#[derive(Debug)]
pub(crate) struct FlakyChunkStorage {
    inner: InMemoryChunkStorage,
    creates: AtomicUsize,
    fail_create_at: AtomicUsize,
    fail_replace: AtomicBool,
}

impl FlakyChunkStorage {
    pub(crate) fn new(inner: InMemoryChunkStorage) -> Arc<Self> {
        Arc::new(Self {
            inner,
            creates: AtomicUsize::new(0),
            fail_create_at: AtomicUsize::new(0),
            fail_replace: AtomicBool::new(false),
        })
    }

    /// Fail the `n`-th create from now on (1 = the next one), once.
    pub(crate) fn fail_create_after(&self, n: usize) {
        let seen = self.creates.load(Ordering::SeqCst);
        self.fail_create_at.store(seen + n, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn chunk_names(&self) -> Vec<String> {
        self.inner.chunk_names()
    }

    fn check_create(&self, chunk: &str) -> Result<()> {
        let count = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.fail_create_at.load(Ordering::SeqCst) {
            return Err(injected("create", chunk));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStorage for FlakyChunkStorage {
    async fn exists(&self, chunk: &str) -> Result<bool> {
        self.inner.exists(chunk).await
    }

    async fn create(&self, chunk: &str) -> Result<ChunkHandle> {
        self.check_create(chunk)?;
        self.inner.create(chunk).await
    }

    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        self.check_create(chunk)?;
        self.inner.create_with_content(chunk, data).await
    }

    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(injected("replace", chunk));
        }
        self.inner.replace(chunk, data).await
    }

    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle> {
        self.inner.open_write(chunk).await
    }

    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle> {
        self.inner.open_read(chunk).await
    }

    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo> {
        self.inner.get_info(chunk).await
    }

    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes> {
        self.inner.read(handle, offset, length).await
    }

    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize> {
        self.inner.write(handle, offset, data).await
    }

    async fn seal(&self, handle: &ChunkHandle) -> Result<()> {
        self.inner.seal(handle).await
    }

    async fn delete(&self, handle: &ChunkHandle) -> Result<()> {
        self.inner.delete(handle).await
    }

    fn supports_append(&self) -> bool {
        self.inner.supports_append()
    }

    fn driver_name(&self) -> &'static str {
        "flaky"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// In-memory metadata store whose updates can be made to fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyMetadataStore {
    inner: InMemoryMetadataStore,
    fail_updates: AtomicBool,
}

impl FlakyMetadataStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkMetadataStore for FlakyMetadataStore {
    async fn get(&self, segment: &str) -> Result<Option<SegmentMetadata>> {
        self.inner.get(segment).await
    }

    async fn create(&self, metadata: SegmentMetadata) -> Result<SegmentMetadata> {
        self.inner.create(metadata).await
    }

    async fn update(&self, metadata: SegmentMetadata) -> Result<SegmentMetadata> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::MetadataConflict {
                segment: metadata.name,
                expected: metadata.version,
                actual: metadata.version + 1,
            });
        }
        self.inner.update(metadata).await
    }

    async fn delete(&self, segment: &str) -> Result<()> {
        self.inner.delete(segment).await
    }

    async fn segment_names(&self) -> Result<Vec<String>> {
        self.inner.segment_names().await
    }
}
