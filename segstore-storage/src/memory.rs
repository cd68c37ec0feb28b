//! In-memory chunk driver.
//!
//! Used by tests, dry runs and mock-mode backends. Contents are lost when the
//! driver is dropped.
//!
//! Also registered as the `INMEMORY` backend so the full factory stack can
//! be exercised without any external service.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{BackendFactoryCreator, StorageBackend};
use crate::traits::{ChunkHandle, ChunkInfo, ChunkStorage};

#[derive(Debug, Default)]
struct MemoryChunk {
    data: Vec<u8>,
    sealed: bool,
}

/// Chunk driver keeping chunks in a map.
#[derive(Debug)]
pub struct InMemoryChunkStorage {
    chunks: Mutex<HashMap<String, MemoryChunk>>,
    append: bool,
}

impl InMemoryChunkStorage {
    /// Create an append-capable driver.
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            append: true,
        }
    }

    /// Create a driver that behaves like an object store: chunks are
    /// written whole and never extended.
    pub fn without_append() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            append: false,
        }
    }

    /// Names of all stored chunks, sorted.
    pub fn chunk_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chunks.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for InMemoryChunkStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStorage for InMemoryChunkStorage {
    async fn exists(&self, chunk: &str) -> Result<bool> {
        Ok(self.chunks.lock().contains_key(chunk))
    }

    async fn create(&self, chunk: &str) -> Result<ChunkHandle> {
        let mut chunks = self.chunks.lock();
        if chunks.contains_key(chunk) {
            return Err(StorageError::AlreadyExists(chunk.to_string()));
        }
        chunks.insert(chunk.to_string(), MemoryChunk::default());
        Ok(ChunkHandle::writable(chunk))
    }

    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let mut chunks = self.chunks.lock();
        if chunks.contains_key(chunk) {
            return Err(StorageError::AlreadyExists(chunk.to_string()));
        }
        chunks.insert(
            chunk.to_string(),
            MemoryChunk {
                data: data.to_vec(),
                sealed: false,
            },
        );
        Ok(ChunkHandle::writable(chunk))
    }

    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        self.chunks.lock().insert(
            chunk.to_string(),
            MemoryChunk {
                data: data.to_vec(),
                sealed: false,
            },
        );
        Ok(ChunkHandle::writable(chunk))
    }

    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle> {
        match self.chunks.lock().get(chunk) {
            Some(c) if c.sealed => Ok(ChunkHandle::read_only(chunk)),
            Some(_) => Ok(ChunkHandle::writable(chunk)),
            None => Err(StorageError::NotFound(chunk.to_string())),
        }
    }

    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle> {
        if self.chunks.lock().contains_key(chunk) {
            Ok(ChunkHandle::read_only(chunk))
        } else {
            Err(StorageError::NotFound(chunk.to_string()))
        }
    }

    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo> {
        match self.chunks.lock().get(chunk) {
            Some(c) => Ok(ChunkInfo {
                name: chunk.to_string(),
                length: c.data.len() as u64,
            }),
            None => Err(StorageError::NotFound(chunk.to_string())),
        }
    }

    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes> {
        let chunks = self.chunks.lock();
        let chunk = chunks
            .get(&handle.chunk_name)
            .ok_or_else(|| StorageError::NotFound(handle.chunk_name.clone()))?;

        let start = offset as usize;
        let end = start.saturating_add(length);
        if end > chunk.data.len() {
            return Err(StorageError::InvalidArgument(format!(
                "Read of {}..{} past end of chunk {} ({} bytes)",
                start,
                end,
                handle.chunk_name,
                chunk.data.len()
            )));
        }
        Ok(Bytes::copy_from_slice(&chunk.data[start..end]))
    }

    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        let mut chunks = self.chunks.lock();
        let chunk = chunks
            .get_mut(&handle.chunk_name)
            .ok_or_else(|| StorageError::NotFound(handle.chunk_name.clone()))?;

        if chunk.sealed {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        if !self.append && !chunk.data.is_empty() {
            return Err(StorageError::NotSupported(format!(
                "Append to existing chunk {}",
                handle.chunk_name
            )));
        }
        if offset != chunk.data.len() as u64 {
            return Err(StorageError::BadOffset {
                name: handle.chunk_name.clone(),
                expected: chunk.data.len() as u64,
                given: offset,
            });
        }
        chunk.data.extend_from_slice(&data);
        Ok(data.len())
    }

    async fn seal(&self, handle: &ChunkHandle) -> Result<()> {
        match self.chunks.lock().get_mut(&handle.chunk_name) {
            Some(c) => {
                c.sealed = true;
                Ok(())
            }
            None => Err(StorageError::NotFound(handle.chunk_name.clone())),
        }
    }

    async fn delete(&self, handle: &ChunkHandle) -> Result<()> {
        self.chunks.lock().remove(&handle.chunk_name);
        Ok(())
    }

    fn supports_append(&self) -> bool {
        self.append
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Configuration of the `INMEMORY` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryBackendConfig {
    /// Whether the driver extends existing chunks
    #[serde(default = "default_append")]
    pub append: bool,
}

fn default_append() -> bool {
    true
}

impl Default for InMemoryBackendConfig {
    fn default() -> Self {
        Self { append: true }
    }
}

impl ConfigSection for InMemoryBackendConfig {
    const SECTION: &'static str = "inmemory";
}

/// Backend handing out a fresh [`InMemoryChunkStorage`] per adapter.
#[derive(Debug)]
pub struct InMemoryBackend;

impl StorageBackend for InMemoryBackend {
    const NAME: &'static str = "INMEMORY";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked, LayoutType::Rolling];
    type Config = InMemoryBackendConfig;

    fn create_chunk_storage(
        config: &Self::Config,
        _executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>> {
        let driver = if config.append {
            InMemoryChunkStorage::new()
        } else {
            InMemoryChunkStorage::without_append()
        };
        Ok(Arc::new(driver))
    }
}

/// Creator of `INMEMORY` factories.
pub type InMemoryStorageFactoryCreator = BackendFactoryCreator<InMemoryBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_write_read() {
        let driver = InMemoryChunkStorage::new();
        let handle = driver.create("c1").await.unwrap();

        driver.write(&handle, 0, Bytes::from("hello ")).await.unwrap();
        driver.write(&handle, 6, Bytes::from("world")).await.unwrap();

        let data = driver.read(&handle, 0, 11).await.unwrap();
        assert_eq!(data, Bytes::from("hello world"));
        assert_eq!(driver.get_info("c1").await.unwrap().length, 11);
    }

    #[tokio::test]
    async fn test_create_existing() {
        let driver = InMemoryChunkStorage::new();
        driver.create("c1").await.unwrap();
        let result = driver.create("c1").await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_write_bad_offset() {
        let driver = InMemoryChunkStorage::new();
        let handle = driver.create("c1").await.unwrap();
        let result = driver.write(&handle, 3, Bytes::from("x")).await;
        assert!(matches!(
            result,
            Err(StorageError::BadOffset {
                expected: 0,
                given: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sealed_chunk_is_read_only() {
        let driver = InMemoryChunkStorage::new();
        let handle = driver.create("c1").await.unwrap();
        driver.seal(&handle).await.unwrap();

        let reopened = driver.open_write("c1").await.unwrap();
        assert!(reopened.read_only);

        let result = driver.write(&handle, 0, Bytes::from("x")).await;
        assert!(matches!(result, Err(StorageError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_without_append() {
        let driver = InMemoryChunkStorage::without_append();
        assert!(!driver.supports_append());

        let handle = driver
            .create_with_content("c1", Bytes::from("abc"))
            .await
            .unwrap();
        let result = driver.write(&handle, 3, Bytes::from("d")).await;
        assert!(matches!(result, Err(StorageError::NotSupported(_))));
    }

    #[test]
    fn test_backend_config_defaults() {
        let config: InMemoryBackendConfig = serde_json::from_str("{}").unwrap();
        assert!(config.append);
    }

    #[tokio::test]
    async fn test_backend_honors_append_flag() {
        let executor = ExecutionContext::current().unwrap();
        let driver = InMemoryBackend::create_chunk_storage(
            &InMemoryBackendConfig { append: false },
            &executor,
        )
        .unwrap();
        assert!(!driver.supports_append());
        assert_eq!(driver.driver_name(), "memory");
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let driver = InMemoryChunkStorage::new();
        driver
            .delete(&ChunkHandle::writable("missing"))
            .await
            .unwrap();
        assert!(driver.chunk_names().is_empty());
    }
}
