//! HDFS backend over the WebHDFS REST API.
//!
//! Supports both layouts. Files are created and appended through the
//! namenode, which redirects data transfers to a datanode:
//!
//! ```text
//!  client ── PUT ?op=CREATE ──► namenode ── 307 Location ──► client
//!  client ── PUT data ───────────────────────────────────► datanode
//! ```
//!
//! Redirects are followed by hand so the body is sent only once. Sealed
//! files get permission `444`.
//!
//! # Configuration
//!
//! ```toml
//! [hdfs]
//! url = "http://namenode:9870"
//! root = "/segstore"
//! replication = 3
//! block_size = 1048576
//! user = "hdfs"
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{redirect, Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{
    BackendFactoryCreator, RollingStorageFactory, SimpleStorageFactory, StorageBackend,
};
use crate::traits::{ChunkHandle, ChunkInfo, ChunkStorage};

const READ_ONLY_PERMISSION: &str = "444";

/// Configuration of the `HDFS` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdfsStorageConfig {
    /// Namenode HTTP address
    #[serde(default = "default_url")]
    pub url: String,
    /// Directory holding all chunks
    #[serde(default = "default_root")]
    pub root: String,
    /// Replication factor of new files
    #[serde(default = "default_replication")]
    pub replication: u16,
    /// Block size of new files in bytes
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// User to act as (`user.name`)
    #[serde(default)]
    pub user: Option<String>,
}

fn default_url() -> String {
    "http://localhost:9870".to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_replication() -> u16 {
    3
}

fn default_block_size() -> u64 {
    1024 * 1024 // 1 MiB
}

impl HdfsStorageConfig {
    /// Configuration for the namenode at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the root directory.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the replication factor.
    pub fn with_replication(mut self, replication: u16) -> Self {
        self.replication = replication;
        self
    }
}

impl Default for HdfsStorageConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            root: default_root(),
            replication: default_replication(),
            block_size: default_block_size(),
            user: None,
        }
    }
}

impl ConfigSection for HdfsStorageConfig {
    const SECTION: &'static str = "hdfs";
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStatus {
    length: u64,
    permission: String,
}

#[derive(Debug, Deserialize)]
struct FileStatusResponse {
    #[serde(rename = "FileStatus")]
    file_status: FileStatus,
}

#[derive(Debug, Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

/// Chunk driver over WebHDFS.
#[derive(Debug, Clone)]
pub struct HdfsChunkStorage {
    client: Client,
    base: Url,
    root: String,
    replication: u16,
    block_size: u64,
    user: Option<String>,
}

impl HdfsChunkStorage {
    /// Create a driver from configuration. Builds the HTTP client only.
    pub fn new(config: &HdfsStorageConfig) -> Result<Self> {
        let base = Url::parse(&config.url).map_err(|e| StorageError::BackendUnavailable {
            backend: HdfsBackend::NAME,
            reason: format!("Invalid url {}: {}", config.url, e),
        })?;
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| StorageError::BackendUnavailable {
                backend: HdfsBackend::NAME,
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base,
            root: config.root.trim_end_matches('/').to_string(),
            replication: config.replication,
            block_size: config.block_size,
            user: config.user.clone(),
        })
    }

    /// Absolute HDFS path of a chunk.
    fn hdfs_path(&self, chunk: &str) -> String {
        format!("{}/{}", self.root, chunk.trim_start_matches('/'))
    }

    /// WebHDFS URL for `op` on `chunk`.
    fn op_url(&self, chunk: &str, op: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/webhdfs/v1{}", self.hdfs_path(chunk)));
        {
            let mut query = url.query_pairs_mut();
            query.clear().append_pair("op", op);
            if let Some(user) = &self.user {
                query.append_pair("user.name", user);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    /// Map an unsuccessful response to an error.
    async fn error_for(chunk: &str, response: Response) -> StorageError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => StorageError::NotFound(chunk.to_string()),
            StatusCode::FORBIDDEN if body.contains("FileAlreadyExistsException") => {
                StorageError::AlreadyExists(chunk.to_string())
            }
            StatusCode::FORBIDDEN if body.contains("AccessControlException") => {
                StorageError::ReadOnly(chunk.to_string())
            }
            _ => StorageError::Backend(format!("WebHDFS {} for {}: {}", status, chunk, body)),
        }
    }

    /// Two-step request: ask the namenode where to send data, then send it.
    async fn send_data(&self, method: Method, chunk: &str, url: Url, data: Bytes) -> Result<()> {
        let response = self.client.request(method.clone(), url).send().await?;
        let location = match response.status() {
            StatusCode::TEMPORARY_REDIRECT => response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    StorageError::Backend(format!("WebHDFS redirect without location for {}", chunk))
                })?,
            status if status.is_success() => return Ok(()),
            _ => return Err(Self::error_for(chunk, response).await),
        };

        debug!("Sending {} bytes to {}", data.len(), location);
        let response = self
            .client
            .request(method, location)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(chunk, response).await)
        }
    }

    async fn file_status(&self, chunk: &str) -> Result<FileStatus> {
        let url = self.op_url(chunk, "GETFILESTATUS", &[]);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(chunk, response).await);
        }
        let status: FileStatusResponse = response.json().await?;
        Ok(status.file_status)
    }

    async fn create_file(&self, chunk: &str, data: Bytes) -> Result<()> {
        let url = self.op_url(
            chunk,
            "CREATE",
            &[
                ("overwrite", "false".to_string()),
                ("replication", self.replication.to_string()),
                ("blocksize", self.block_size.to_string()),
            ],
        );
        self.send_data(Method::PUT, chunk, url, data).await
    }

    /// Move `from` onto `to`. Returns false when the namenode refuses,
    /// which WebHDFS does when `to` already exists.
    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let url = self.op_url(from, "RENAME", &[("destination", self.hdfs_path(to))]);
        let response = self.client.put(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(from, response).await);
        }
        let result: BooleanResponse = response.json().await?;
        Ok(result.boolean)
    }
}

#[async_trait]
impl ChunkStorage for HdfsChunkStorage {
    async fn exists(&self, chunk: &str) -> Result<bool> {
        match self.file_status(chunk).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn create(&self, chunk: &str) -> Result<ChunkHandle> {
        self.create_file(chunk, Bytes::new()).await?;
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn create_with_content(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        self.create_file(chunk, data).await?;
        Ok(ChunkHandle::writable(chunk))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn replace(&self, chunk: &str, data: Bytes) -> Result<ChunkHandle> {
        let staged = format!("{}.{}.tmp", chunk, Uuid::new_v4().simple());
        self.create_file(&staged, data).await?;

        // WebHDFS cannot rename over an existing file. The old content is
        // dropped only once the new content is fully written.
        if !self.rename(&staged, chunk).await? {
            self.delete(&ChunkHandle::writable(chunk)).await?;
            if !self.rename(&staged, chunk).await? {
                return Err(StorageError::Backend(format!(
                    "WebHDFS refused to move {} onto {}",
                    staged, chunk
                )));
            }
        }
        Ok(ChunkHandle::writable(chunk))
    }

    async fn open_write(&self, chunk: &str) -> Result<ChunkHandle> {
        let status = self.file_status(chunk).await?;
        if status.permission == READ_ONLY_PERMISSION {
            Ok(ChunkHandle::read_only(chunk))
        } else {
            Ok(ChunkHandle::writable(chunk))
        }
    }

    async fn open_read(&self, chunk: &str) -> Result<ChunkHandle> {
        self.file_status(chunk).await?;
        Ok(ChunkHandle::read_only(chunk))
    }

    async fn get_info(&self, chunk: &str) -> Result<ChunkInfo> {
        let status = self.file_status(chunk).await?;
        Ok(ChunkInfo {
            name: chunk.to_string(),
            length: status.length,
        })
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn read(&self, handle: &ChunkHandle, offset: u64, length: usize) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let url = self.op_url(
            &handle.chunk_name,
            "OPEN",
            &[
                ("offset", offset.to_string()),
                ("length", length.to_string()),
            ],
        );

        let mut response = self.client.get(url).send().await?;
        if response.status() == StatusCode::TEMPORARY_REDIRECT {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    StorageError::Backend(format!(
                        "WebHDFS redirect without location for {}",
                        handle.chunk_name
                    ))
                })?;
            response = self.client.get(location).send().await?;
        }
        if !response.status().is_success() {
            return Err(Self::error_for(&handle.chunk_name, response).await);
        }

        let data = response.bytes().await?;
        if data.len() != length {
            return Err(StorageError::InvalidArgument(format!(
                "Read of {} bytes at {} past end of chunk {}",
                length, offset, handle.chunk_name
            )));
        }
        Ok(data)
    }

    #[instrument(skip(self, handle, data), fields(chunk = %handle.chunk_name, size = data.len()))]
    async fn write(&self, handle: &ChunkHandle, offset: u64, data: Bytes) -> Result<usize> {
        if handle.read_only {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        let status = self.file_status(&handle.chunk_name).await?;
        if status.permission == READ_ONLY_PERMISSION {
            return Err(StorageError::ReadOnly(handle.chunk_name.clone()));
        }
        if status.length != offset {
            return Err(StorageError::BadOffset {
                name: handle.chunk_name.clone(),
                expected: status.length,
                given: offset,
            });
        }

        let written = data.len();
        let url = self.op_url(&handle.chunk_name, "APPEND", &[]);
        self.send_data(Method::POST, &handle.chunk_name, url, data)
            .await?;
        Ok(written)
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn seal(&self, handle: &ChunkHandle) -> Result<()> {
        let url = self.op_url(
            &handle.chunk_name,
            "SETPERMISSION",
            &[("permission", READ_ONLY_PERMISSION.to_string())],
        );
        let response = self.client.put(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(&handle.chunk_name, response).await)
        }
    }

    #[instrument(skip(self, handle), fields(chunk = %handle.chunk_name))]
    async fn delete(&self, handle: &ChunkHandle) -> Result<()> {
        let url = self.op_url(&handle.chunk_name, "DELETE", &[]);
        let response = self.client.delete(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::error_for(&handle.chunk_name, response).await),
        }
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn driver_name(&self) -> &'static str {
        "hdfs"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The `HDFS` backend.
#[derive(Debug)]
pub struct HdfsBackend;

impl StorageBackend for HdfsBackend {
    const NAME: &'static str = "HDFS";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked, LayoutType::Rolling];
    type Config = HdfsStorageConfig;

    fn create_chunk_storage(
        config: &Self::Config,
        _executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>> {
        Ok(Arc::new(HdfsChunkStorage::new(config)?))
    }
}

/// Creator of `HDFS` factories.
pub type HdfsStorageFactoryCreator = BackendFactoryCreator<HdfsBackend>;
/// Chunked `HDFS` factory.
pub type HdfsSimpleStorageFactory = SimpleStorageFactory<HdfsBackend>;
/// Rolling `HDFS` factory.
pub type HdfsRollingStorageFactory = RollingStorageFactory<HdfsBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: HdfsStorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HdfsStorageConfig::default());
        assert_eq!(config.url, "http://localhost:9870");
        assert_eq!(config.replication, 3);
        assert_eq!(config.block_size, 1024 * 1024);
    }

    #[test]
    fn test_op_url() {
        let mut config = HdfsStorageConfig::new("http://namenode:9870").with_root("/segstore/");
        config.user = Some("hdfs".to_string());
        let storage = HdfsChunkStorage::new(&config).unwrap();

        let url = storage.op_url("scope/stream/0$header", "GETFILESTATUS", &[]);
        assert_eq!(url.path(), "/webhdfs/v1/segstore/scope/stream/0$header");
        assert_eq!(url.query(), Some("op=GETFILESTATUS&user.name=hdfs"));

        let url = storage.op_url("c", "OPEN", &[("offset", "10".to_string())]);
        assert_eq!(url.query(), Some("op=OPEN&user.name=hdfs&offset=10"));
    }

    #[test]
    fn test_default_root() {
        let storage = HdfsChunkStorage::new(&HdfsStorageConfig::default()).unwrap();
        assert_eq!(storage.hdfs_path("seg"), "/seg");
    }

    #[test]
    fn test_invalid_url() {
        let result = HdfsChunkStorage::new(&HdfsStorageConfig::new("::not a url"));
        assert!(matches!(
            result,
            Err(StorageError::BackendUnavailable { backend: "HDFS", .. })
        ));
    }

    #[test]
    fn test_rename_url() {
        let storage =
            HdfsChunkStorage::new(&HdfsStorageConfig::new("http://namenode:9870").with_root("/s"))
                .unwrap();
        let url = storage.op_url(
            "seg$header.1.tmp",
            "RENAME",
            &[("destination", storage.hdfs_path("seg$header"))],
        );
        assert_eq!(url.path(), "/webhdfs/v1/s/seg$header.1.tmp");
        assert_eq!(url.query(), Some("op=RENAME&destination=%2Fs%2Fseg%24header"));

        let result: BooleanResponse = serde_json::from_str(r#"{"boolean":false}"#).unwrap();
        assert!(!result.boolean);
    }

    #[test]
    fn test_file_status_parsing() {
        let body = r#"{"FileStatus":{"accessTime":0,"blockSize":1048576,"length":42,
            "owner":"hdfs","permission":"444","replication":3,"type":"FILE"}}"#;
        let status: FileStatusResponse = serde_json::from_str(body).unwrap();
        assert_eq!(status.file_status.length, 42);
        assert_eq!(status.file_status.permission, READ_ONLY_PERMISSION);
    }
}
