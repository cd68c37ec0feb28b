pub mod list;
pub mod probe;

pub use list::run_list;
pub use probe::{run_probe, ProbeOptions};

use segstore_storage::{InMemoryStorageFactoryCreator, StorageFactoryRegistry};
use std::sync::Arc;

/// Every compiled-in backend plus `INMEMORY` for dry runs.
pub fn registry() -> StorageFactoryRegistry {
    let mut registry = StorageFactoryRegistry::with_default_creators();
    registry.register(Arc::new(InMemoryStorageFactoryCreator::new()));
    registry
}
