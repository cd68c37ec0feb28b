use anyhow::{bail, Context, Result};
use segstore_storage::{
    Bytes, ContainerId, ExecutionContext, InMemoryMetadataStore, LayoutType, SegmentRollingPolicy,
    Storage, StorageFactoryDescriptor, StorageFactoryRegistry, TomlConfigSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const PROBE_PAYLOAD: &[u8] = b"segstore probe payload";

/// Options for the probe command.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub config: PathBuf,
    pub backend: String,
    pub layout: String,
    pub container: ContainerId,
}

/// Build a factory and adapter for one backend, then write, read back and
/// delete a probe segment through it.
pub async fn run_probe(registry: &StorageFactoryRegistry, options: ProbeOptions) -> Result<()> {
    let Some(layout) = LayoutType::parse(&options.layout) else {
        bail!(
            "Unknown layout '{}'. Use 'chunked' or 'rolling'.",
            options.layout
        );
    };
    let descriptor = StorageFactoryDescriptor::new(options.backend.clone(), layout);

    let config = TomlConfigSource::from_path(&options.config)
        .with_context(|| format!("Failed to load configuration from {:?}", options.config))?;
    let executor = ExecutionContext::current()?;

    let factory = registry
        .create_factory(&descriptor, &config, executor)
        .with_context(|| format!("Failed to create factory for {}", descriptor))?;

    let storage: Arc<dyn Storage> = match factory.as_chunked() {
        Some(chunked) => chunked
            .create_storage_adapter_for(options.container, Arc::new(InMemoryMetadataStore::new()))?,
        None => factory.create_storage_adapter()?,
    };
    tracing::info!("Created {} adapter", descriptor);

    let segment = format!("_probe/{}", uuid::Uuid::new_v4());
    let start = Instant::now();

    storage.initialize(1).await?;
    let handle = storage
        .create(&segment, SegmentRollingPolicy::NO_ROLLING)
        .await
        .context("Failed to create probe segment")?;
    storage
        .write(&handle, 0, Bytes::from_static(PROBE_PAYLOAD))
        .await
        .context("Failed to write probe segment")?;

    let data = storage
        .read(&handle, 0, PROBE_PAYLOAD.len())
        .await
        .context("Failed to read probe segment")?;
    if data.as_ref() != PROBE_PAYLOAD {
        bail!("Probe segment read back {} unexpected bytes", data.len());
    }

    storage
        .delete(&handle)
        .await
        .context("Failed to delete probe segment")?;

    println!(
        "{}: ok ({} bytes round-tripped in {:.1?})",
        descriptor,
        PROBE_PAYLOAD.len(),
        start.elapsed()
    );
    Ok(())
}
