//! Local filesystem backend.
//!
//! Chunks are plain files under a root directory. Chunk names containing
//! `/` map to nested directories, created on demand. Sealing a chunk makes
//! its file read-only.
//!
//! # Configuration
//!
//! ```toml
//! [filesystem]
//! root = "/var/lib/segstore"
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{
    BackendFactoryCreator, RollingStorageFactory, SimpleStorageFactory, StorageBackend,
};
use crate::traits::{ChunkHandle, ChunkInfo, ChunkStorage};

/// Configuration of the `FILESYSTEM` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemStorageConfig {
    /// Directory holding all chunks
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".segstore")
        .join("data")
}

impl FileSystemStorageConfig {
    /// Configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for FileSystemStorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

impl ConfigSection for FileSystemStorageConfig {
    const SECTION: &'static str = "filesystem";
}

/// Chunk driver on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemChunkStorage {
    root: PathBuf,
}

impl FileSystemChunkStorage {
    /// Create a driver rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a chunk name to a file below the root.
    fn to_fs_path(&self, chunk: &str) -> Result<PathBuf> {
        let relative = Path::new(chunk);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if chunk.is_empty() || escapes {
            return Err(StorageError::InvalidArgument(format!(
                "Invalid chunk name: {}",
                chunk
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Ensure parent directories exist for a path.
    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn metadata(&self, chunk: &str, path: &Path) -> Result<std::fs::Metadata> {
        match fs::metadata(path).await {
            Ok(m) => Ok(m),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(chunk.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_file(&self, chunk: &str) -> Result<(PathBuf, fs::File)> {
        let path = self.to_fs_path(chunk)?;
        self.ensure_parent(&path).await?;
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(chunk.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ChunkStorage for FileSystemChunkStorage {
    async fn exists(&self, chunk: &str) -> Result<bool> {
        let path = self.to_fs_path(chunk)?;
        Ok(fs::try_exists(&path).await?)
    }

    #[instrument(skip(self))]
    async fn create(&self, chunk: &str) -> Result<ChunkHandle> {
        let (path, _file) = self.create_file(chunk).await?;
        debug!("Created {:?}", path);
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let (path, mut file) = self.create_file(chunk).await?;
        debug!("Writing {} bytes to new chunk {:?}", data.len(), path);
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let path = self.to_fs_path(chunk)?;
        self.ensure_parent(&path).await?;

        // Rename over the old file so readers never see a missing chunk
        let mut staged = path.clone().into_os_string();
        staged.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let staged = PathBuf::from(staged);

        let mut file = fs::File::create(&staged).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&staged, &path).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e.into());
        }
        debug!("Replaced {:?} with {} bytes", path, data.len());
        Ok(ChunkHandle::writable(chunk))
    }

    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle> {
        let path = self.to_fs_path(chunk)?;
        let metadata = self.metadata(chunk, &path).await?;
        if metadata.permissions().readonly() {
            Ok(ChunkHandle::read_only(chunk))
        } else {
            Ok(ChunkHandle::writable(chunk))
        }
    }

    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle> {
        let path = self.to_fs_path(chunk)?;
        self.metadata(chunk, &path).await?;
        Ok(ChunkHandle::read_only(chunk))
    }

    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo> {
        let path = self.to_fs_path(chunk)?;
        let metadata = self.metadata(chunk, &path).await?;
        Ok(ChunkInfo {
            name: chunk.to_string(),
            length: metadata.len(),
        })
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes> {
        let path = self.to_fs_path(&handle.chunk_name)?;
        debug!("Reading {} bytes at {} from {:?}", length, offset, path);

        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(handle.chunk_name.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = vec![0u8; length];
        match file.read_exact(&mut buffer).await {
            Ok(_) => Ok(Bytes::from(buffer)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(StorageError::InvalidArgument(format!(
                    "Read of {} bytes at {} past end of chunk {}",
                    length, offset, handle.chunk_name
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, handle, data), fields(chunk = %handle.chunk_name, size = data.len()))]
    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        let path = self.to_fs_path(&handle.chunk_name)?;
        let metadata = self.metadata(&handle.chunk_name, &path).await?;
        if metadata.permissions().readonly() {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        if metadata.len() != offset {
            return Err(StorageError::BadOffset {
                name: handle.chunk_name.clone(),
                expected: metadata.len(),
                given: offset,
            });
        }

        let mut file = OpenOptions::new().append(true).open(&path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(data.len())
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn seal(&self, handle: &ChunkHandle) -> Result<()> {
        let path = self.to_fs_path(&handle.chunk_name)?;
        let metadata = self.metadata(&handle.chunk_name, &path).await?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).await?;
        Ok(())
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn delete(&self, handle: &ChunkHandle) -> Result<()> {
        let path = self.to_fs_path(&handle.chunk_name)?;
        debug!("Deleting {:?}", path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn driver_name(&self) -> &'static str {
        "filesystem"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `FILESYSTEM` backend.
#[derive(Debug)]
pub struct FileSystemBackend;

impl StorageBackend for FileSystemBackend {
    const NAME: &'static str = "FILESYSTEM";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked, LayoutType::Rolling];
    type Config = FileSystemStorageConfig;

    fn create_chunk_storage(
        config: &Self::Config,
        _executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>> {
        if config.root.as_os_str().is_empty() {
            return Err(StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: "root directory is empty".to_string(),
            });
        }
        Ok(Arc::new(FileSystemChunkStorage::new(config.root.clone())))
    }
}

/// Creator of `FILESYSTEM` factories.
pub type FileSystemStorageFactoryCreator = BackendFactoryCreator<FileSystemBackend>;
/// Chunked `FILESYSTEM` factory.
pub type FileSystemSimpleStorageFactory = SimpleStorageFactory<FileSystemBackend>;
/// Rolling `FILESYSTEM` factory.
pub type FileSystemRollingStorageFactory = RollingStorageFactory<FileSystemBackend>;
