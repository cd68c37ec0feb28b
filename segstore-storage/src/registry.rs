//! Name-keyed table of installed factory creators.
//!
//! Built once at process start. Selection is by exact backend name plus
//! layout; nothing is discovered at runtime.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backends::filesystem::FileSystemStorageFactoryCreator;
use crate::config::ConfigSource;
use crate::descriptor::StorageFactoryDescriptor;
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::factory::{StorageFactory, StorageFactoryCreator};

/// Registry of storage factory creators.
#[derive(Default)]
pub struct StorageFactoryRegistry {
    creators: Vec<Arc<dyn StorageFactoryCreator>>,
}

impl StorageFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every backend compiled into this build.
    pub fn with_default_creators() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileSystemStorageFactoryCreator::new()));
        #[cfg(feature = "hdfs")]
        registry.register(Arc::new(
            crate::backends::hdfs::HdfsStorageFactoryCreator::new(),
        ));
        #[cfg(feature = "s3")]
        {
            registry.register(Arc::new(
                crate::backends::extended_s3::ExtendedS3StorageFactoryCreator::new(),
            ));
            registry.register(Arc::new(crate::backends::s3::S3StorageFactoryCreator::new()));
        }
        #[cfg(feature = "azure")]
        registry.register(Arc::new(
            crate::backends::azure::AzureStorageFactoryCreator::new(),
        ));
        #[cfg(feature = "gcp")]
        registry.register(Arc::new(crate::backends::gcp::GcpStorageFactoryCreator::new()));
        registry
    }

    /// Install a creator. A creator with the same name is replaced.
    pub fn register(&mut self, creator: Arc<dyn StorageFactoryCreator>) {
        let name = creator.name();
        if let Some(existing) = self.creators.iter_mut().find(|c| c.name() == name) {
            warn!(backend = name, "Replacing registered storage factory creator");
            *existing = creator;
        } else {
            debug!(backend = name, "Registered storage factory creator");
            self.creators.push(creator);
        }
    }

    /// Names of the installed creators, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.creators.iter().map(|c| c.name()).collect()
    }

    /// Look up a creator by exact backend name.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn StorageFactoryCreator>> {
        self.creators.iter().find(|c| c.name() == name)
    }

    /// Every advertised descriptor, grouped by creator.
    pub fn descriptors(&self) -> Vec<StorageFactoryDescriptor> {
        self.creators
            .iter()
            .flat_map(|c| c.get_storage_factories())
            .collect()
    }

    /// Build the factory for `descriptor` with the matching creator.
    ///
    /// # Errors
    ///
    /// `StorageError::UnrecognizedDescriptor` if no creator has that name,
    /// otherwise whatever the creator returns.
    pub fn create_factory(
        &self,
        descriptor: &StorageFactoryDescriptor,
        config: &dyn ConfigSource,
        executor: ExecutionContext,
    ) -> Result<Box<dyn StorageFactory>> {
        let creator = self
            .find(&descriptor.name)
            .ok_or_else(|| StorageError::UnrecognizedDescriptor(descriptor.clone()))?;
        creator.create_factory(descriptor, config, executor)
    }
}

impl fmt::Debug for StorageFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageFactoryRegistry")
            .field("creators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkedSegmentStorageConfig, ConfigSetup};
    use crate::descriptor::LayoutType;
    use crate::memory::{InMemoryBackendConfig, InMemoryStorageFactoryCreator};

    #[test]
    fn test_default_creators() {
        let registry = StorageFactoryRegistry::with_default_creators();
        assert!(registry.find("FILESYSTEM").is_some());
        assert!(registry.find("filesystem").is_none());
        assert!(registry.find("INMEMORY").is_none());

        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0], StorageFactoryDescriptor::chunked("FILESYSTEM"));
        assert_eq!(descriptors[1], StorageFactoryDescriptor::rolling("FILESYSTEM"));
    }

    #[cfg(all(feature = "hdfs", feature = "s3", feature = "azure", feature = "gcp"))]
    #[test]
    fn test_all_backends_registered() {
        let registry = StorageFactoryRegistry::with_default_creators();
        assert_eq!(
            registry.names(),
            vec!["FILESYSTEM", "HDFS", "EXTENDEDS3", "S3", "AZURE", "GCP"]
        );
        assert_eq!(registry.descriptors().len(), 9);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = StorageFactoryRegistry::new();
        registry.register(Arc::new(InMemoryStorageFactoryCreator::new()));
        registry.register(Arc::new(InMemoryStorageFactoryCreator::new()));
        assert_eq!(registry.names(), vec!["INMEMORY"]);
    }

    #[tokio::test]
    async fn test_create_factory_dispatch() {
        let mut registry = StorageFactoryRegistry::new();
        registry.register(Arc::new(InMemoryStorageFactoryCreator::new()));
        let config = ConfigSetup::new()
            .with(&ChunkedSegmentStorageConfig::DEFAULT)
            .unwrap()
            .with(&InMemoryBackendConfig::default())
            .unwrap();
        let executor = ExecutionContext::current().unwrap();

        let factory = registry
            .create_factory(
                &StorageFactoryDescriptor::rolling("INMEMORY"),
                &config,
                executor.clone(),
            )
            .unwrap();
        assert_eq!(factory.layout(), LayoutType::Rolling);

        let result = registry.create_factory(
            &StorageFactoryDescriptor::chunked("NOPE"),
            &config,
            executor,
        );
        assert!(matches!(result, Err(StorageError::UnrecognizedDescriptor(_))));
    }
}
