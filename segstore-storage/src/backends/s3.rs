//! Amazon S3 backend.
//!
//! Chunked layout only. Works against AWS and S3-compatible services
//! (MinIO, Ceph) through `object_store`'s `AmazonS3Builder`.
//!
//! # Configuration
//!
//! ```toml
//! [s3]
//! config_uri = "http://localhost:9000"
//! region = "us-east-1"
//! bucket = "segments"
//! prefix = "cluster-a/"
//! access_key = "minioadmin"
//! secret_key = "minioadmin"
//!
//! # Optional: use the ambient credential chain instead of static keys
//! assume_role = true
//! user_role = "arn:aws:iam::123456789012:role/segstore"
//! ```

use object_store::aws::AmazonS3Builder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::backends::object::ObjectStoreChunkStorage;
use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{BackendFactoryCreator, SimpleStorageFactory, StorageBackend};
use crate::traits::ChunkStorage;

/// Configuration of the `S3` backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3StorageConfig {
    /// Endpoint URI; empty for AWS
    #[serde(default)]
    pub config_uri: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Prefix for all chunk keys
    #[serde(default)]
    pub prefix: String,
    /// Static access key
    #[serde(default)]
    pub access_key: Option<String>,
    /// Static secret key
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Take credentials from the ambient AWS chain (web identity, ECS or
    /// instance metadata) instead of static keys
    #[serde(default)]
    pub assume_role: bool,
    /// Role the ambient chain must assume. Checked against `AWS_ROLE_ARN`
    /// when that is set; a mismatch fails the driver.
    #[serde(default)]
    pub user_role: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3StorageConfig {
    /// Configuration for `bucket` at `config_uri`.
    pub fn new(config_uri: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            config_uri: config_uri.into(),
            region: default_region(),
            bucket: bucket.into(),
            prefix: String::new(),
            access_key: None,
            secret_key: None,
            assume_role: false,
            user_role: None,
        }
    }

    /// Set prefix for all chunk keys.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set static credentials.
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Use role-based credentials.
    pub fn with_role(mut self, user_role: impl Into<String>) -> Self {
        self.assume_role = true;
        self.user_role = Some(user_role.into());
        self
    }
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl std::fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("config_uri", &self.config_uri)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("access_key", &self.access_key)
            .field("assume_role", &self.assume_role)
            .field("user_role", &self.user_role)
            .finish()
    }
}

impl ConfigSection for S3StorageConfig {
    const SECTION: &'static str = "s3";
}

/// Chunk driver of the `S3` backend.
pub type S3ChunkStorage = ObjectStoreChunkStorage<S3Backend>;

/// The `S3` backend.
#[derive(Debug)]
pub struct S3Backend;

/// Ensure the role in the environment is the configured one.
fn check_role(expected: Option<&str>, ambient: Option<&str>) -> Result<()> {
    match (expected, ambient) {
        (Some(expected), Some(ambient)) if expected != ambient => {
            Err(StorageError::BackendAuthFailure {
                backend: S3Backend::NAME,
                reason: format!(
                    "configured role {} differs from AWS_ROLE_ARN {}",
                    expected, ambient
                ),
            })
        }
        _ => Ok(()),
    }
}

impl S3Backend {
    fn builder(config: &S3StorageConfig) -> Result<AmazonS3Builder> {
        let builder = if config.assume_role {
            let ambient = std::env::var("AWS_ROLE_ARN").ok();
            check_role(config.user_role.as_deref(), ambient.as_deref())?;
            info!(
                user_role = config.user_role.as_deref().unwrap_or(""),
                "Using role credentials from the environment"
            );
            AmazonS3Builder::from_env()
        } else {
            AmazonS3Builder::new()
        };
        let mut builder = builder
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if !config.config_uri.is_empty() {
            builder = builder
                .with_endpoint(&config.config_uri)
                .with_allow_http(config.config_uri.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }

        if !config.assume_role {
            if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key)
            {
                builder = builder
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);
            }
        }
        Ok(builder)
    }
}

impl StorageBackend for S3Backend {
    const NAME: &'static str = "S3";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked];
    type Config = S3StorageConfig;

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
        let store = Self::builder(config)?
            .build()
            .map_err(|e| StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: e.to_string(),
            })?;
        Ok(Arc::new(S3ChunkStorage::from_store(
            Arc::new(store),
            config.prefix.clone(),
        )))
    }
}

/// Creator of `S3` factories.
pub type S3StorageFactoryCreator = BackendFactoryCreator<S3Backend>;
/// Chunked `S3` factory.
pub type S3SimpleStorageFactory = SimpleStorageFactory<S3Backend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: S3StorageConfig = serde_json::from_str(r#"{"bucket": "b"}"#).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(!config.assume_role);
        assert!(config.access_key.is_none());
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = S3StorageConfig::new("http://127.0.0.1", "bucket")
            .with_credentials("user", "very-secret");
        assert!(!format!("{:?}", config).contains("very-secret"));
    }

    #[tokio::test]
    async fn test_driver_builds_without_io() {
        let config = S3StorageConfig::new("http://127.0.0.1", "bucket")
            .with_prefix("samplePrefix")
            .with_credentials("user", "secret");
        let executor = ExecutionContext::current().unwrap();
        let driver = S3Backend::create_chunk_storage(&config, &executor).unwrap();
        let driver = driver.as_any().downcast_ref::<S3ChunkStorage>().unwrap();
        assert_eq!(driver.prefix(), "samplePrefix");
    }

    #[test]
    fn test_role_must_match_environment() {
        let role = "arn:aws:iam::123456789012:role/segstore";
        assert!(check_role(Some(role), Some(role)).is_ok());
        assert!(check_role(Some(role), None).is_ok());
        assert!(check_role(None, Some(role)).is_ok());

        let result = check_role(Some(role), Some("arn:aws:iam::123456789012:role/other"));
        assert!(matches!(
            result,
            Err(StorageError::BackendAuthFailure { backend: "S3", .. })
        ));
    }

    #[tokio::test]
    async fn test_role_driver_builds_from_environment() {
        let mut config = S3StorageConfig::new("http://127.0.0.1", "bucket");
        config.assume_role = true;
        let executor = ExecutionContext::current().unwrap();
        assert!(S3Backend::create_chunk_storage(&config, &executor).is_ok());
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let executor = ExecutionContext::current().unwrap();
        let result = S3Backend::create_chunk_storage(&S3StorageConfig::default(), &executor);
        assert!(matches!(
            result,
            Err(StorageError::BackendUnavailable { backend: "S3", .. })
        ));
    }
}
