//! Azure Blob Storage backend.
//!
//! Chunked layout only. With `use_emulator` the driver talks to a local
//! Azurite instance using its well-known development account.
//!
//! # Configuration
//!
//! ```toml
//! [azure]
//! container = "segments"
//! prefix = "cluster-a/"
//! account_name = "segstore"
//! account_key = "..."
//!
//! # Or, for local development
//! use_emulator = true
//! ```

use object_store::azure::MicrosoftAzureBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backends::object::ObjectStoreChunkStorage;
use crate::config::ConfigSection;
use crate::descriptor::LayoutType;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{BackendFactoryCreator, SimpleStorageFactory, StorageBackend};
use crate::traits::ChunkStorage;

/// Configuration of the `AZURE` backend.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureStorageConfig {
    /// Blob service endpoint override
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Container name
    #[serde(default)]
    pub container: String,
    /// Prefix for all chunk keys
    #[serde(default)]
    pub prefix: String,
    /// Storage account name
    #[serde(default)]
    pub account_name: Option<String>,
    /// Storage account key
    #[serde(default)]
    pub account_key: Option<String>,
    /// Talk to a local emulator
    #[serde(default)]
    pub use_emulator: bool,
}

impl AzureStorageConfig {
    /// Configuration for `container` in account `account_name`.
    pub fn new(account_name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            account_name: Some(account_name.into()),
            container: container.into(),
            ..Default::default()
        }
    }

    /// Configuration for `container` on a local emulator.
    pub fn emulator(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            use_emulator: true,
            ..Default::default()
        }
    }

    /// Set prefix for all chunk keys.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the account key.
    pub fn with_account_key(mut self, account_key: impl Into<String>) -> Self {
        self.account_key = Some(account_key.into());
        self
    }

    /// Override the blob service endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl std::fmt::Debug for AzureStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureStorageConfig")
            .field("endpoint", &self.endpoint)
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .field("account_name", &self.account_name)
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

impl ConfigSection for AzureStorageConfig {
    const SECTION: &'static str = "azure";
}

/// Chunk driver of the `AZURE` backend.
pub type AzureChunkStorage = ObjectStoreChunkStorage<AzureBackend>;

/// The `AZURE` backend.
#[derive(Debug)]
pub struct AzureBackend;

impl StorageBackend for AzureBackend {
    const NAME: &'static str = "AZURE";
    const LAYOUTS: &'static [LayoutType] = &[LayoutType::Chunked];
    type Config = AzureStorageConfig;

    fn create_chunk_storage(
        config: &Self::Config,
        _executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>> {
        if config.container.is_empty() {
            return Err(StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: "container is not set".to_string(),
            });
        }

        let mut builder = MicrosoftAzureBuilder::new().with_container_name(&config.container);
        if config.use_emulator {
            builder = builder.with_use_emulator(true);
        } else {
            let account_name =
                config
                    .account_name
                    .as_deref()
                    .ok_or_else(|| StorageError::BackendUnavailable {
                        backend: Self::NAME,
                        reason: "account_name is not set".to_string(),
                    })?;
            builder = builder.with_account(account_name);
            if let Some(account_key) = &config.account_key {
                builder = builder.with_access_key(account_key);
            }
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::BackendUnavailable {
                backend: Self::NAME,
                reason: e.to_string(),
            })?;
        Ok(Arc::new(AzureChunkStorage::from_store(
            Arc::new(store),
            config.prefix.clone(),
        )))
    }
}

/// Creator of `AZURE` factories.
pub type AzureStorageFactoryCreator = BackendFactoryCreator<AzureBackend>;
/// Chunked `AZURE` factory.
pub type AzureSimpleStorageFactory = SimpleStorageFactory<AzureBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emulator_driver() {
        let executor = ExecutionContext::current().unwrap();
        let config = AzureStorageConfig::emulator("container").with_prefix("samplePrefix");
        let driver = AzureBackend::create_chunk_storage(&config, &executor).unwrap();
        assert!(driver.as_any().downcast_ref::<AzureChunkStorage>().is_some());
    }

    #[tokio::test]
    async fn test_missing_account() {
        let executor = ExecutionContext::current().unwrap();
        let config = AzureStorageConfig {
            container: "container".to_string(),
            ..Default::default()
        };
        let result = AzureBackend::create_chunk_storage(&config, &executor);
        assert!(matches!(
            result,
            Err(StorageError::BackendUnavailable { backend: "AZURE", .. })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let config = AzureStorageConfig::new("account", "container").with_account_key("c2VjcmV0");
        assert!(!format!("{:?}", config).contains("c2VjcmV0"));
    }
}
