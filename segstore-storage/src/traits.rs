//! Core storage trait definitions.
//!
//! Three layers share these types:
//!
//! - [`ChunkStorage`]: the backend driver, raw chunk I/O on one medium.
//! - [`Storage`]: the asynchronous segment contract handed to the segment
//!   store, implemented by the chunked engine and by the async wrapper.
//! - [`SyncStorage`]: the same contract, blocking, implemented by the legacy
//!   rolling layout.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::error::Result;

/// Handle on an open segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentHandle {
    /// Segment name
    pub segment_name: String,
    /// Whether the handle only permits reads
    pub read_only: bool,
}

impl SegmentHandle {
    /// Handle permitting writes.
    pub fn writable(segment_name: impl Into<String>) -> Self {
        Self {
            segment_name: segment_name.into(),
            read_only: false,
        }
    }

    /// Handle permitting reads only.
    pub fn read_only(segment_name: impl Into<String>) -> Self {
        Self {
            segment_name: segment_name.into(),
            read_only: true,
        }
    }
}

/// Point-in-time view of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentProperties {
    /// Segment name
    pub name: String,
    /// Total bytes written, including truncated bytes
    pub length: u64,
    /// First readable offset
    pub start_offset: u64,
    /// Whether the segment accepts further writes
    pub sealed: bool,
}

/// Upper bound on the size of one rolling file or chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRollingPolicy {
    /// Maximum bytes per chunk
    pub max_length: u64,
}

impl SegmentRollingPolicy {
    /// Policy that never rolls.
    pub const NO_ROLLING: SegmentRollingPolicy = SegmentRollingPolicy {
        max_length: u64::MAX,
    };

    /// Roll after `max_length` bytes.
    pub fn new(max_length: u64) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }
}

impl Default for SegmentRollingPolicy {
    fn default() -> Self {
        Self::NO_ROLLING
    }
}

/// Asynchronous segment storage contract.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`; a container issues concurrent
/// operations against one instance.
///
/// # Offsets
///
/// Writes are only accepted at the segment's current length. Reads must lie
/// within `[start_offset, length)`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fence out instances running with an older epoch.
    async fn initialize(&self, epoch: u64) -> Result<()>;

    /// Create an empty segment.
    async fn create(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle>;

    /// Open a segment for writing, taking ownership of it.
    async fn open_write(&self, segment: &str) -> Result<SegmentHandle>;

    /// Open a segment for reading.
    async fn open_read(&self, segment: &str) -> Result<SegmentHandle>;

    /// Read `length` bytes starting at `offset`.
    async fn read(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes>;

    /// Append `data` at `offset`, which must equal the segment's length.
    async fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()>;

    /// Get segment properties.
    async fn get_info(&self, segment: &str) -> Result<SegmentProperties>;

    /// Check if a segment exists.
    async fn exists(&self, segment: &str) -> Result<bool>;

    /// Make the segment immutable.
    async fn seal(&self, handle: &SegmentHandle) -> Result<()>;

    /// Append the sealed `source` segment to `target` at `offset`.
    ///
    /// The source segment no longer exists afterwards.
    async fn concat(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()>;

    /// Delete the segment and its data.
    async fn delete(&self, handle: &SegmentHandle) -> Result<()>;

    /// Discard all data before `offset`.
    async fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()>;

    /// Whether [`Storage::truncate`] is supported.
    fn supports_truncation(&self) -> bool;

    /// Concrete type access, e.g. to inspect which driver an adapter uses.
    fn as_any(&self) -> &dyn Any;
}

/// Blocking segment storage contract.
///
/// Same semantics as [`Storage`]. Implementations may block the calling
/// thread and must not be called from inside an async task.
pub trait SyncStorage: Send + Sync {
    /// Fence out instances running with an older epoch.
    fn initialize(&self, epoch: u64) -> Result<()>;

    /// Create an empty segment.
    fn create(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle>;

    /// Open a segment for writing.
    fn open_write(&self, segment: &str) -> Result<SegmentHandle>;

    /// Open a segment for reading.
    fn open_read(&self, segment: &str) -> Result<SegmentHandle>;

    /// Read `length` bytes starting at `offset`.
    fn read(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes>;

    /// Append `data` at `offset`.
    fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()>;

    /// Get segment properties.
    fn get_info(&self, segment: &str) -> Result<SegmentProperties>;

    /// Check if a segment exists.
    fn exists(&self, segment: &str) -> Result<bool>;

    /// Make the segment immutable.
    fn seal(&self, handle: &SegmentHandle) -> Result<()>;

    /// Append the sealed `source` segment to `target` at `offset`.
    fn concat(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()>;

    /// Delete the segment and its data.
    fn delete(&self, handle: &SegmentHandle) -> Result<()>;

    /// Discard all data before `offset`.
    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()>;

    /// Whether [`SyncStorage::truncate`] is supported.
    fn supports_truncation(&self) -> bool;

    /// Concrete type access.
    fn as_any(&self) -> &dyn Any;
}

/// Handle on a chunk held by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    /// Chunk name, unique within the driver's namespace
    pub chunk_name: String,
    /// Whether the handle only permits reads
    pub read_only: bool,
}

impl ChunkHandle {
    /// Handle permitting writes.
    pub fn writable(chunk_name: impl Into<String>) -> Self {
        Self {
            chunk_name: chunk_name.into(),
            read_only: false,
        }
    }

    /// Handle permitting reads only.
    pub fn read_only(chunk_name: impl Into<String>) -> Self {
        Self {
            chunk_name: chunk_name.into(),
            read_only: true,
        }
    }
}

/// Metadata about a stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk name
    pub name: String,
    /// Size in bytes
    pub length: u64,
}

/// Backend storage driver: raw chunk I/O against one physical medium.
///
/// A chunk is a named byte sequence. Drivers that cannot append
/// ([`ChunkStorage::supports_append`] is false) only accept whole-chunk
/// writes through [`ChunkStorage::create_with_content`].
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Check if a chunk exists.
    async fn exists(&self, chunk: &str) -> Result<bool>;

    /// Create an empty chunk.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the chunk exists.
    async fn create(&self, chunk: &str) -> Result<ChunkHandle>;

    /// Create a chunk holding `data`.
    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let handle = self.create(chunk).await?;
        if !data.is_empty() {
            self.write(&handle, 0, data).await?;
        }
        Ok(handle)
    }

    /// Overwrite the whole chunk with `data`, creating it if absent.
    ///
    /// The swap is atomic: a failure leaves the previous content readable.
    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle>;

    /// Open an existing chunk for writing.
    ///
    /// Sealed chunks yield a read-only handle.
    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle>;

    /// Open an existing chunk for reading.
    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle>;

    /// Get chunk metadata.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the chunk does not exist.
    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo>;

    /// Read `length` bytes starting at `offset`.
    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes>;

    /// Append `data` at `offset`, which must equal the chunk length.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize>;

    /// Make the chunk read-only.
    async fn seal(&self, handle: &ChunkHandle) -> Result<()>;

    /// Delete the chunk.
    ///
    /// No-op if the chunk does not exist (idempotent).
    async fn delete(&self, handle: &ChunkHandle) -> Result<()>;

    /// Whether [`ChunkStorage::write`] can extend an existing chunk.
    fn supports_append(&self) -> bool;

    /// Get a human-readable name for this driver.
    fn driver_name(&self) -> &'static str;

    /// Concrete type access.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChunkStorage;

    #[test]
    fn test_rolling_policy() {
        assert_eq!(SegmentRollingPolicy::default(), SegmentRollingPolicy::NO_ROLLING);
        assert_eq!(SegmentRollingPolicy::new(0).max_length, 1);
        assert_eq!(SegmentRollingPolicy::new(4096).max_length, 4096);
    }

    #[test]
    fn test_handles() {
        let handle = SegmentHandle::writable("scope/stream/0");
        assert!(!handle.read_only);
        assert!(SegmentHandle::read_only("scope/stream/0").read_only);
        assert!(ChunkHandle::read_only("c").read_only);
    }

    #[tokio::test]
    async fn test_create_with_content() {
        let driver = InMemoryChunkStorage::new();
        let handle = driver
            .create_with_content("chunk-1", Bytes::from("payload"))
            .await
            .unwrap();

        let info = driver.get_info(&handle.chunk_name).await.unwrap();
        assert_eq!(info.length, 7);

        let data = driver.read(&handle, 0, 7).await.unwrap();
        assert_eq!(data, Bytes::from("payload"));
    }
}
