//! Extended S3 backend.
//!
//! For S3-compatible appliances configured through a single URI that
//! carries the credentials as query parameters:
//!
//! ```text
//! http://127.0.0.1:9020?identity=user&secretKey=password
//! ```
//!
//! Supports both layouts. Requests are always path-style.
//!
//! # Configuration
//!
//! ```toml
//! [extendeds3]
//! config_uri = "http://127.0.0.1:9020?identity=user&secretKey=password"
//! bucket = "segments"
//! prefix = "cluster-a/"
//! ```

use object_store::aws::AmazonS3Builder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::backends::object::ObjectStoreChunkStorage;
use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{
    BackendFactoryCreator, RollingStorageFactory, SimpleStorageFactory, StorageBackend,
};
use crate::traits::ChunkStorage;

const IDENTITY_PARAM: &str = "identity";
const SECRET_KEY_PARAM: &str = "secretKey";
const REGION_PARAM: &str = "region";

/// Configuration of the `EXTENDEDS3` backend.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedS3StorageConfig {
    /// Endpoint with `identity` and `secretKey` query parameters
    #[serde(default)]
    pub config_uri: String,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Prefix for all chunk keys
    #[serde(default)]
    pub prefix: String,
}

impl ExtendedS3StorageConfig {
    /// Configuration for `bucket` at `config_uri`.
    pub fn new(config_uri: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            config_uri: config_uri.into(),
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Set prefix for all chunk keys.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl std::fmt::Debug for ExtendedS3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoint = parse_config_uri(&self.config_uri)
            .map(|uri| uri.endpoint)
            .unwrap_or_else(|_| "<invalid>".to_string());
        f.debug_struct("ExtendedS3StorageConfig")
            .field("endpoint", &endpoint)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ConfigSection for ExtendedS3StorageConfig {
    const SECTION: &'static str = "extendeds3";
}

/// Endpoint and credentials extracted from a configuration URI.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigUri {
    endpoint: String,
    identity: Option<String>,
    secret_key: Option<String>,
    region: Option<String>,
}

fn parse_config_uri(config_uri: &str) -> Result<ConfigUri> {
    let mut url = Url::parse(config_uri).map_err(|e| StorageError::BackendUnavailable {
        backend: ExtendedS3Backend::NAME,
        reason: format!("Invalid config_uri: {}", e),
    })?;

    let mut parsed = ConfigUri {
        endpoint: String::new(),
        identity: None,
        secret_key: None,
        region: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            IDENTITY_PARAM => parsed.identity = Some(value.into_owned()),
            SECRET_KEY_PARAM => parsed.secret_key = Some(value.into_owned()),
            REGION_PARAM => parsed.region = Some(value.into_owned()),
            _ => {}
        }
    }

    url.set_query(None);
    parsed.endpoint = url.as_str().trim_end_matches('/').to_string();
    Ok(parsed)
}

/// Chunk driver of the `EXTENDEDS3` backend.
pub type ExtendedS3ChunkStorage = ObjectStoreChunkStorage<ExtendedS3Backend>;

/// The `EXTENDEDS3` backend.
#[derive(Debug)]
pub struct ExtendedS3Backend;

impl StorageBackend for ExtendedS3Backend {
    const NAME: &'static str = "EXTENDEDS3";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked, LayoutType::Rolling];
    type Config = ExtendedS3StorageConfig;

    fn create_chunk_storage(
        config: &Self::Config,
        _executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>> {
        if config.bucket.is_empty() {
            return Err(StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: "bucket is not set".to_string(),
            });
        }
        let uri = parse_config_uri(&config.config_uri)?;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(uri.region.as_deref().unwrap_or("us-east-1"))
            .with_endpoint(&uri.endpoint)
            .with_allow_http(uri.endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false);
        if let (Some(identity), Some(secret_key)) = (&uri.identity, &uri.secret_key) {
            builder = builder
                .with_access_key_id(identity)
                .with_secret_access_key(secret_key);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: e.to_string(),
            })?;
        Ok(Arc::new(ExtendedS3ChunkStorage::from_store(
            Arc::new(store),
            config.prefix.clone(),
        )))
    }
}

/// Creator of `EXTENDEDS3` factories.
pub type ExtendedS3StorageFactoryCreator = BackendFactoryCreator<ExtendedS3Backend>;
/// Chunked `EXTENDEDS3` factory.
pub type ExtendedS3SimpleStorageFactory = SimpleStorageFactory<ExtendedS3Backend>;
/// Rolling `EXTENDEDS3` factory.
pub type ExtendedS3RollingStorageFactory = RollingStorageFactory<ExtendedS3Backend>;
