//! Pluggable storage backends for the segstore segment store.
//!
//! Segments are append-only byte sequences. This crate turns a backend name
//! plus a configuration into ready-to-use segment storage, in one of two
//! layouts:
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │  StorageFactoryRegistry  │  name → creator
//!            └────────────┬─────────────┘
//!                         ▼
//!            ┌──────────────────────────┐
//!            │  StorageFactoryCreator   │  descriptors, config lookup
//!            └─────┬──────────────┬─────┘
//!                  ▼              ▼
//!   ┌────────────────────┐  ┌────────────────────┐
//!   │ SimpleStorageFactory│  │RollingStorageFactory│
//!   └─────────┬──────────┘  └─────────┬──────────┘
//!             ▼                       ▼
//!   ┌────────────────────┐  ┌────────────────────┐
//!   │ChunkedSegmentStorage│ │AsyncStorageWrapper │
//!   │ (metadata + chunks) │ │  └ RollingStorage  │
//!   └─────────┬──────────┘  └─────────┬──────────┘
//!             └───────────┬───────────┘
//!                         ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ ChunkStorage: filesystem │ hdfs │ s3 │ azure │ gcp │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! - **chunked**: segment metadata lives in a caller-supplied
//!   [`ChunkMetadataStore`]; one engine is built per container.
//! - **rolling**: segment metadata lives in a header chunk next to the data;
//!   the synchronous implementation is wrapped for async callers.
//!
//! # Quick Start
//!
//! ```no_run
//! use segstore_storage::{
//!     ExecutionContext, InMemoryMetadataStore, SegmentRollingPolicy, StorageFactoryDescriptor,
//!     StorageFactoryRegistry, TomlConfigSource,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> segstore_storage::Result<()> {
//! let config = TomlConfigSource::parse(
//!     r#"
//!     [chunked]
//!     max_chunk_size = 1048576
//!
//!     [filesystem]
//!     root = "/var/lib/segstore"
//!     "#,
//! )?;
//!
//! let registry = StorageFactoryRegistry::with_default_creators();
//! let factory = registry.create_factory(
//!     &StorageFactoryDescriptor::chunked("FILESYSTEM"),
//!     &config,
//!     ExecutionContext::current()?,
//! )?;
//!
//! if let Some(chunked) = factory.as_chunked() {
//!     let storage = chunked.create_storage_adapter_for(0, Arc::new(InMemoryMetadataStore::new()))?;
//!     storage.initialize(1).await?;
//!     let handle = storage.create("scope/stream/0", SegmentRollingPolicy::NO_ROLLING).await?;
//!     storage.write(&handle, 0, segstore_storage::Bytes::from("hello")).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `s3` - `S3` and `EXTENDEDS3` backends (requires `object_store`)
//! - `azure` - `AZURE` backend
//! - `gcp` - `GCP` backend
//! - `hdfs` - `HDFS` backend over WebHDFS
//! - `full` - Enable all backends
//!
//! `FILESYSTEM` is always available.

pub mod backends;
mod chunked;
mod config;
mod descriptor;
mod error;
mod executor;
mod factory;
mod locks;
mod memory;
mod metadata;
mod registry;
mod rolling;
#[cfg(test)]
mod testing;
mod traits;
mod wrapper;

pub use chunked::{ChunkedSegmentStorage, ContainerId};
pub use config::{
    ChunkedSegmentStorageConfig, ConfigSection, ConfigSetup, ConfigSource, TomlConfigSource,
};
pub use descriptor::{LayoutType, StorageFactoryDescriptor};
pub use error::{Result, StorageError};
pub use executor::ExecutionContext;
pub use factory::{
    BackendFactoryCreator, ChunkedStorageFactory, RollingStorageFactory,
    RollingStorageFactoryBuilder, SimpleStorageFactory, SimpleStorageFactoryBuilder,
    StorageBackend, StorageFactory, StorageFactoryCreator,
};
pub use locks::{SegmentGuard, SegmentLocks};
pub use memory::{
    InMemoryBackend, InMemoryBackendConfig, InMemoryChunkStorage, InMemoryStorageFactoryCreator,
};
pub use metadata::{ChunkMetadata, ChunkMetadataStore, InMemoryMetadataStore, SegmentMetadata};
pub use registry::StorageFactoryRegistry;
pub use rolling::RollingStorage;
pub use traits::{
    ChunkHandle, ChunkInfo, ChunkStorage, SegmentHandle, SegmentProperties, SegmentRollingPolicy,
    Storage, SyncStorage,
};
pub use wrapper::AsyncStorageWrapper;

// Re-export bytes for convenience
pub use bytes::Bytes;
