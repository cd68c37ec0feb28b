//! Chunk driver shared by the object-store backends.
//!
//! Uses the `object_store` crate for S3, ExtendedS3, Azure and GCP. Objects
//! are immutable once written: a chunk is created whole and never extended,
//! so [`ChunkStorage::supports_append`] is false and the engines put every
//! write into a new chunk.
//!
//! The backend marker `B` only tags the driver type, so that
//! `ObjectStoreChunkStorage<S3Backend>` and
//! `ObjectStoreChunkStorage<GcpBackend>` are distinguishable.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{Result, StorageError};
use crate::factory::StorageBackend;
use crate::traits::{ChunkHandle, ChunkInfo, ChunkStorage};

/// Chunk driver over an [`ObjectStore`].
pub struct ObjectStoreChunkStorage<B: StorageBackend> {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    _backend: PhantomData<fn() -> B>,
}

impl<B: StorageBackend> ObjectStoreChunkStorage<B> {
    /// Create a driver over `store`, keeping all chunks below `prefix`.
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            _backend: PhantomData,
        }
    }

    /// Key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Convert a chunk name to an object path.
    fn to_object_path(&self, chunk: &str) -> ObjectPath {
        let path = if self.prefix.is_empty() {
            chunk.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), chunk)
        };
        ObjectPath::from(path)
    }

    fn map_error(chunk: &str, error: object_store::Error) -> StorageError {
        match error {
            object_store::Error::NotFound { .. } => StorageError::NotFound(chunk.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                StorageError::AlreadyExists(chunk.to_string())
            }
            e => StorageError::from(e),
        }
    }

    async fn head_size(&self, chunk: &str) -> Result<u64> {
        let path = self.to_object_path(chunk);
        match self.store.head(&path).await {
            Ok(meta) => Ok(meta.size as u64),
            Err(e) => Err(Self::map_error(chunk, e)),
        }
    }

    /// Put an object unless it exists.
    ///
    /// Stores without conditional puts fall back to a head check.
    async fn put_new(&self, chunk: &str, data: Bytes) -> Result<()> {
        let path = self.to_object_path(chunk);
        let options = PutOptions::from(PutMode::Create);
        match self
            .store
            .put_opts(&path, PutPayload::from(data.clone()), options)
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::NotImplemented) => {
                if self.exists(chunk).await? {
                    return Err(StorageError::AlreadyExists(chunk.to_string()));
                }
                self.store
                    .put(&path, PutPayload::from(data))
                    .await
                    .map_err(|e| Self::map_error(chunk, e))?;
                Ok(())
            }
            Err(e) => Err(Self::map_error(chunk, e)),
        }
    }
}

impl<B: StorageBackend> fmt::Debug for ObjectStoreChunkStorage<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreChunkStorage")
            .field("backend", &B::NAME)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl<B: StorageBackend> ChunkStorage for ObjectStoreChunkStorage<B> {
    async fn exists(&self, chunk: &str) -> Result<bool> {
        match self.head_size(chunk).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = B::NAME))]
    async fn create(&self, chunk: &str) -> Result<ChunkHandle> {
        self.put_new(chunk, Bytes::new()).await?;
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(backend = B::NAME, size = data.len()))]
    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        debug!("Writing {} bytes to {:?}", data.len(), self.to_object_path(chunk));
        self.put_new(chunk, data).await?;
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(backend = B::NAME, size = data.len()))]
    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let path = self.to_object_path(chunk);
        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| Self::map_error(chunk, e))?;
        Ok(ChunkHandle::writable(chunk))
    }

    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle> {
        self.head_size(chunk).await?;
        Ok(ChunkHandle::writable(chunk))
    }

    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle> {
        self.head_size(chunk).await?;
        Ok(ChunkHandle::read_only(chunk))
    }

    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo> {
        Ok(ChunkInfo {
            name: chunk.to_string(),
            length: self.head_size(chunk).await?,
        })
    }

    #[instrument(skip(self, handle), fields(backend = B::NAME, chunk = %handle.chunk_name))]
    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let size = self.head_size(&handle.chunk_name).await?;
        let end = offset.saturating_add(length as u64);
        if end > size {
            return Err(StorageError::InvalidArgument(format!(
                "Read of {}..{} past end of chunk {} ({} bytes)",
                offset, end, handle.chunk_name, size
            )));
        }

        let path = self.to_object_path(&handle.chunk_name);
        let start = offset as usize;
        self.store
            .get_range(&path, start..start + length)
            .await
            .map_err(|e| Self::map_error(&handle.chunk_name, e))
    }

    /// Only the first write into an empty chunk is accepted; objects cannot
    /// be extended.
    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        let size = self.head_size(&handle.chunk_name).await?;
        if size != offset {
            return Err(StorageError::BadOffset {
                name: handle.chunk_name.clone(),
                expected: size,
                given: offset,
            });
        }
        if size > 0 {
            return Err(StorageError::NotSupported(format!(
                "Append to object {}",
                handle.chunk_name
            )));
        }

        let written = data.len();
        let path = self.to_object_path(&handle.chunk_name);
        self.store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| Self::map_error(&handle.chunk_name, e))?;
        Ok(written)
    }

    async fn seal(&self, handle: &ChunkHandle) -> Result<()> {
        // Objects are immutable already
        self.head_size(&handle.chunk_name).await?;
        Ok(())
    }

    #[instrument(skip(self, handle), fields(backend = B::NAME, chunk = %handle.chunk_name))]
    async fn delete(&self, handle: &ChunkHandle) -> Result<()> {
        let path = self.to_object_path(&handle.chunk_name);
        debug!("Deleting {:?}", path);

        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    fn supports_append(&self) -> bool {
        false
    }

    fn driver_name(&self) -> &'static str {
        B::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use object_store::memory::InMemory;

    type TestStorage = ObjectStoreChunkStorage<InMemoryBackend>;

    fn create_storage(prefix: &str) -> TestStorage {
        TestStorage::from_store(Arc::new(InMemory::new()), prefix)
    }

    #[test]
    fn test_to_object_path() {
        assert_eq!(
            create_storage("").to_object_path("scope/stream/0$header").as_ref(),
            "scope/stream/0$header"
        );
        assert_eq!(
            create_storage("samplePrefix/")
                .to_object_path("seg.E-1-O-0.x")
                .as_ref(),
            "samplePrefix/seg.E-1-O-0.x"
        );
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let storage = create_storage("pfx");
        assert!(!storage.supports_append());

        let handle = storage
            .create_with_content("seg/c1", Bytes::from("hello world"))
            .await
            .unwrap();
        assert!(storage.exists("seg/c1").await.unwrap());
        assert_eq!(storage.get_info("seg/c1").await.unwrap().length, 11);
        assert_eq!(
            storage.read(&handle, 6, 5).await.unwrap(),
            Bytes::from("world")
        );

        storage.delete(&handle).await.unwrap();
        storage.delete(&handle).await.unwrap();
        assert!(!storage.exists("seg/c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_existing() {
        let storage = create_storage("");
        storage.create("c").await.unwrap();
        let result = storage.create_with_content("c", Bytes::from("x")).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let storage = create_storage("pfx");
        storage
            .create_with_content("seg$header", Bytes::from("old"))
            .await
            .unwrap();
        let handle = storage
            .replace("seg$header", Bytes::from("newer"))
            .await
            .unwrap();
        assert_eq!(storage.get_info("seg$header").await.unwrap().length, 5);
        assert_eq!(
            storage.read(&handle, 0, 5).await.unwrap(),
            Bytes::from("newer")
        );
    }

    #[tokio::test]
    async fn test_write_only_into_empty_object() {
        let storage = create_storage("");
        let handle = storage.create("c").await.unwrap();
        storage.write(&handle, 0, Bytes::from("abc")).await.unwrap();

        let result = storage.write(&handle, 3, Bytes::from("d")).await;
        assert!(matches!(result, Err(StorageError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = create_storage("");
        assert!(matches!(
            storage.get_info("missing").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.open_read("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let storage = create_storage("");
        let handle = storage
            .create_with_content("c", Bytes::from("abc"))
            .await
            .unwrap();
        let result = storage.read(&handle, 1, 10).await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }
}
