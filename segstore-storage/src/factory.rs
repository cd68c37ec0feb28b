//! Storage factories and factory creators.
//!
//! Every backend gets two factory shapes from the same generic code:
//!
//! | Layout    | Factory                      | Adapter construction                         |
//! |-----------|------------------------------|----------------------------------------------|
//! | `chunked` | [`SimpleStorageFactory<B>`]  | `create_storage_adapter_for(container, md)`  |
//! | `rolling` | [`RollingStorageFactory<B>`] | `create_storage_adapter()`, `create_sync_storage()` |
//!
//! The chunked factory rejects the container-less calls with
//! [`StorageError::UnsupportedLayout`]; the rolling factory has no
//! two-argument form at all ([`StorageFactory::as_chunked`] is `None`).
//!
//! A [`BackendFactoryCreator<B>`] advertises the descriptors of backend `B`
//! and builds its factories from a [`ConfigSource`].
//!
//! # Example
//!
//! ```ignore
//! use segstore_storage::backends::filesystem::FileSystemStorageFactoryCreator;
//!
//! let creator = FileSystemStorageFactoryCreator::new();
//! let descriptor = StorageFactoryDescriptor::chunked("FILESYSTEM");
//! let factory = creator.create_factory(&descriptor, &config, executor)?;
//! if let Some(chunked) = factory.as_chunked() {
//!     let storage = chunked.create_storage_adapter_for(42, metadata_store)?;
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

use crate::chunked::{ChunkedSegmentStorage, ContainerId};
use crate::config::{ChunkedSegmentStorageConfig, ConfigSection, ConfigSource};
use crate::descriptor::{LayoutType, StorageFactoryDescriptor};
use crate::error::{Result, StorageError};
use crate::executor::ExecutionContext;
use crate::metadata::ChunkMetadataStore;
use crate::rolling::RollingStorage;
use crate::traits::{ChunkStorage, Storage, SyncStorage};
use crate::wrapper::AsyncStorageWrapper;

/// A storage backend: identifier, supported layouts, configuration and
/// driver constructor.
pub trait StorageBackend: Send + Sync + 'static {
    /// Case-exact backend identifier, e.g. `FILESYSTEM`.
    const NAME: &'static str;

    /// Layouts this backend supports, in advertisement order.
    const LAYOUTS: &'static [LayoutType];

    /// Backend configuration section.
    type Config: ConfigSection + fmt::Debug;

    /// Build a fresh driver bound to `config`.
    ///
    /// Builds clients only; never contacts the backend.
    ///
    /// # Errors
    ///
    /// `StorageError::BackendUnavailable` if the driver cannot be set up,
    /// `StorageError::BackendAuthFailure` if the credentials are unusable.
    fn create_chunk_storage(
        config: &Self::Config,
        executor: &ExecutionContext,
    ) -> Result<Arc<dyn ChunkStorage>>;

    /// Descriptors this backend advertises.
    fn descriptors() -> Vec<StorageFactoryDescriptor> {
        Self::LAYOUTS
            .iter()
            .map(|layout| StorageFactoryDescriptor::new(Self::NAME, *layout))
            .collect()
    }
}

/// Builds storage adapters for one backend and layout.
pub trait StorageFactory: Send + Sync {
    /// Descriptor this factory was created for.
    fn descriptor(&self) -> StorageFactoryDescriptor;

    /// Layout of the adapters this factory builds.
    fn layout(&self) -> LayoutType {
        self.descriptor().layout
    }

    /// Build a container-less asynchronous adapter.
    fn create_storage_adapter(&self) -> Result<Arc<dyn Storage>>;

    /// Build the synchronous adapter.
    fn create_sync_storage(&self) -> Result<Arc<dyn SyncStorage>>;

    /// The two-argument form, present only for chunked factories.
    fn as_chunked(&self) -> Option<&dyn ChunkedStorageFactory>;

    /// Concrete type access.
    fn as_any(&self) -> &dyn Any;
}

/// Factory building one chunked engine per container.
pub trait ChunkedStorageFactory: StorageFactory {
    /// Build a fresh engine over a fresh driver for `container_id`.
    fn create_storage_adapter_for(
        &self,
        container_id: ContainerId,
        metadata_store: Arc<dyn ChunkMetadataStore>,
    ) -> Result<Arc<dyn Storage>>;
}

/// Chunked layout factory for backend `B`.
pub struct SimpleStorageFactory<B: StorageBackend> {
    engine_config: ChunkedSegmentStorageConfig,
    backend_config: B::Config,
    executor: ExecutionContext,
}

impl<B: StorageBackend> SimpleStorageFactory<B> {
    /// Create a factory from all of its arguments.
    pub fn new(
        engine_config: ChunkedSegmentStorageConfig,
        backend_config: B::Config,
        executor: ExecutionContext,
    ) -> Self {
        Self {
            engine_config,
            backend_config,
            executor,
        }
    }

    /// Start building a factory argument by argument.
    pub fn builder() -> SimpleStorageFactoryBuilder<B> {
        SimpleStorageFactoryBuilder {
            engine_config: None,
            backend_config: None,
            executor: None,
        }
    }

    /// Engine configuration handed to every adapter.
    pub fn engine_config(&self) -> &ChunkedSegmentStorageConfig {
        &self.engine_config
    }

    /// Backend configuration handed to every driver.
    pub fn backend_config(&self) -> &B::Config {
        &self.backend_config
    }

    /// Shared execution context.
    pub fn executor(&self) -> &ExecutionContext {
        &self.executor
    }

    fn unsupported(&self, operation: &'static str) -> StorageError {
        StorageError::UnsupportedLayout {
            layout: LayoutType::Chunked,
            operation,
        }
    }
}

impl<B: StorageBackend> StorageFactory for SimpleStorageFactory<B> {
    fn descriptor(&self) -> StorageFactoryDescriptor {
        StorageFactoryDescriptor::chunked(B::NAME)
    }

    fn layout(&self) -> LayoutType {
        LayoutType::Chunked
    }

    fn create_storage_adapter(&self) -> Result<Arc<dyn Storage>> {
        Err(self.unsupported("create_storage_adapter"))
    }

    fn create_sync_storage(&self) -> Result<Arc<dyn SyncStorage>> {
        Err(self.unsupported("create_sync_storage"))
    }

    fn as_chunked(&self) -> Option<&dyn ChunkedStorageFactory> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<B: StorageBackend> ChunkedStorageFactory for SimpleStorageFactory<B> {
    fn create_storage_adapter_for(
        &self,
        container_id: ContainerId,
        metadata_store: Arc<dyn ChunkMetadataStore>,
    ) -> Result<Arc<dyn Storage>> {
        info!(
            backend = B::NAME,
            container_id, "Creating chunked storage adapter"
        );
        let driver = B::create_chunk_storage(&self.backend_config, &self.executor)?;
        Ok(Arc::new(ChunkedSegmentStorage::new(
            container_id,
            driver,
            metadata_store,
            self.engine_config.clone(),
            self.executor.clone(),
        )))
    }
}

impl<B: StorageBackend> fmt::Debug for SimpleStorageFactory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleStorageFactory")
            .field("backend", &B::NAME)
            .field("engine_config", &self.engine_config)
            .finish()
    }
}

/// Builder for [`SimpleStorageFactory`].
pub struct SimpleStorageFactoryBuilder<B: StorageBackend> {
    engine_config: Option<ChunkedSegmentStorageConfig>,
    backend_config: Option<B::Config>,
    executor: Option<ExecutionContext>,
}

impl<B: StorageBackend> SimpleStorageFactoryBuilder<B> {
    /// Set the engine configuration.
    pub fn engine_config(mut self, config: ChunkedSegmentStorageConfig) -> Self {
        self.engine_config = Some(config);
        self
    }

    /// Set the backend configuration.
    pub fn backend_config(mut self, config: B::Config) -> Self {
        self.backend_config = Some(config);
        self
    }

    /// Set the execution context.
    pub fn executor(mut self, executor: ExecutionContext) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the factory.
    ///
    /// # Errors
    ///
    /// `StorageError::NullArgument` naming the first missing argument.
    pub fn build(self) -> Result<SimpleStorageFactory<B>> {
        Ok(SimpleStorageFactory::new(
            self.engine_config
                .ok_or(StorageError::NullArgument("engine_config"))?,
            self.backend_config
                .ok_or(StorageError::NullArgument("backend_config"))?,
            self.executor.ok_or(StorageError::NullArgument("executor"))?,
        ))
    }
}

/// Rolling layout factory for backend `B`.
pub struct RollingStorageFactory<B: StorageBackend> {
    backend_config: B::Config,
    executor: ExecutionContext,
}

impl<B: StorageBackend> RollingStorageFactory<B> {
    /// Create a factory from all of its arguments.
    pub fn new(backend_config: B::Config, executor: ExecutionContext) -> Self {
        Self {
            backend_config,
            executor,
        }
    }

    /// Start building a factory argument by argument.
    pub fn builder() -> RollingStorageFactoryBuilder<B> {
        RollingStorageFactoryBuilder {
            backend_config: None,
            executor: None,
        }
    }

    /// Backend configuration handed to every driver.
    pub fn backend_config(&self) -> &B::Config {
        &self.backend_config
    }

    /// Shared execution context.
    pub fn executor(&self) -> &ExecutionContext {
        &self.executor
    }

    fn create_rolling_storage(&self) -> Result<Arc<RollingStorage>> {
        let driver = B::create_chunk_storage(&self.backend_config, &self.executor)?;
        Ok(Arc::new(RollingStorage::new(driver, self.executor.clone())))
    }
}

impl<B: StorageBackend> StorageFactory for RollingStorageFactory<B> {
    fn descriptor(&self) -> StorageFactoryDescriptor {
        StorageFactoryDescriptor::rolling(B::NAME)
    }

    fn layout(&self) -> LayoutType {
        LayoutType::Rolling
    }

    fn create_storage_adapter(&self) -> Result<Arc<dyn Storage>> {
        info!(backend = B::NAME, "Creating rolling storage adapter");
        let storage = self.create_rolling_storage()?;
        Ok(Arc::new(AsyncStorageWrapper::new(
            storage,
            self.executor.clone(),
        )))
    }

    fn create_sync_storage(&self) -> Result<Arc<dyn SyncStorage>> {
        info!(backend = B::NAME, "Creating rolling sync storage");
        Ok(self.create_rolling_storage()?)
    }

    fn as_chunked(&self) -> Option<&dyn ChunkedStorageFactory> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<B: StorageBackend> fmt::Debug for RollingStorageFactory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingStorageFactory")
            .field("backend", &B::NAME)
            .finish()
    }
}

/// Builder for [`RollingStorageFactory`].
pub struct RollingStorageFactoryBuilder<B: StorageBackend> {
    backend_config: Option<B::Config>,
    executor: Option<ExecutionContext>,
}

impl<B: StorageBackend> RollingStorageFactoryBuilder<B> {
    /// Set the backend configuration.
    pub fn backend_config(mut self, config: B::Config) -> Self {
        self.backend_config = Some(config);
        self
    }

    /// Set the execution context.
    pub fn executor(mut self, executor: ExecutionContext) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the factory.
    ///
    /// # Errors
    ///
    /// `StorageError::NullArgument` naming the first missing argument.
    pub fn build(self) -> Result<RollingStorageFactory<B>> {
        Ok(RollingStorageFactory::new(
            self.backend_config
                .ok_or(StorageError::NullArgument("backend_config"))?,
            self.executor.ok_or(StorageError::NullArgument("executor"))?,
        ))
    }
}

/// Entry point of one backend: advertises descriptors and dispenses
/// factories.
pub trait StorageFactoryCreator: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Supported descriptors, chunked before rolling. Pure and stable.
    fn get_storage_factories(&self) -> Vec<StorageFactoryDescriptor>;

    /// Build the factory for `descriptor`.
    ///
    /// The chunked layout reads the `chunked` section and then the backend
    /// section; the rolling layout reads the backend section only.
    ///
    /// # Errors
    ///
    /// `StorageError::UnrecognizedDescriptor` if `descriptor` is not
    /// advertised, `StorageError::NullArgument` if a section is missing.
    fn create_factory(
        &self,
        descriptor: &StorageFactoryDescriptor,
        config: &dyn ConfigSource,
        executor: ExecutionContext,
    ) -> Result<Box<dyn StorageFactory>>;
}

/// Creator for backend `B`.
pub struct BackendFactoryCreator<B: StorageBackend> {
    _backend: PhantomData<fn() -> B>,
}

impl<B: StorageBackend> BackendFactoryCreator<B> {
    /// Create the creator.
    pub fn new() -> Self {
        Self {
            _backend: PhantomData,
        }
    }
}

impl<B: StorageBackend> Default for BackendFactoryCreator<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: StorageBackend> fmt::Debug for BackendFactoryCreator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactoryCreator")
            .field("backend", &B::NAME)
            .finish()
    }
}

impl<B: StorageBackend> StorageFactoryCreator for BackendFactoryCreator<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn get_storage_factories(&self) -> Vec<StorageFactoryDescriptor> {
        B::descriptors()
    }

    fn create_factory(
        &self,
        descriptor: &StorageFactoryDescriptor,
        config: &dyn ConfigSource,
        executor: ExecutionContext,
    ) -> Result<Box<dyn StorageFactory>> {
        if !self.get_storage_factories().contains(descriptor) {
            return Err(StorageError::UnrecognizedDescriptor(descriptor.clone()));
        }

        match descriptor.layout {
            LayoutType::Chunked => {
                let engine_config = config
                    .get_config::<ChunkedSegmentStorageConfig>()?
                    .ok_or(StorageError::NullArgument("engine_config"))?;
                let backend_config = config
                    .get_config::<B::Config>()?
                    .ok_or(StorageError::NullArgument("backend_config"))?;
                Ok(Box::new(SimpleStorageFactory::<B>::new(
                    engine_config,
                    backend_config,
                    executor,
                )))
            }
            LayoutType::Rolling => {
                let backend_config = config
                    .get_config::<B::Config>()?
                    .ok_or(StorageError::NullArgument("backend_config"))?;
                Ok(Box::new(RollingStorageFactory::<B>::new(
                    backend_config,
                    executor,
                )))
            }
        }
    }
}
