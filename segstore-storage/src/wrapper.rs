//! Asynchronous facade over a blocking [`SyncStorage`].
//!
//! Every call is handed to the execution context's blocking pool. Calls on
//! the same segment run one at a time, in arrival order; calls on different
//! segments run in parallel.

use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;
use tracing::instrument;

use crate::error::Result;
use crate::executor::ExecutionContext;
use crate::locks::SegmentLocks;
use crate::traits::{SegmentHandle, SegmentProperties, SegmentRollingPolicy, Storage, SyncStorage};

/// Adapts a [`SyncStorage`] to the [`Storage`] contract.
pub struct AsyncStorageWrapper {
    inner: Arc<dyn SyncStorage>,
    executor: ExecutionContext,
    locks: SegmentLocks,
}

impl AsyncStorageWrapper {
    /// Wrap `inner`, running its calls on `executor`.
    pub fn new(inner: Arc<dyn SyncStorage>, executor: ExecutionContext) -> Self {
        Self {
            inner,
            executor,
            locks: SegmentLocks::new(),
        }
    }

    /// The wrapped blocking storage.
    pub fn inner(&self) -> &Arc<dyn SyncStorage> {
        &self.inner
    }

    async fn run<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&dyn SyncStorage) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        self.executor.run_blocking(move || work(inner.as_ref())).await
    }
}

#[async_trait]
impl Storage for AsyncStorageWrapper {
    async fn initialize(&self, epoch: u64) -> Result<()> {
        self.run(move |s| s.initialize(epoch)).await
    }

    #[instrument(skip(self))]
    async fn create(&self, segment: &str, policy: SegmentRollingPolicy) -> Result<SegmentHandle> {
        let _guard = self.locks.lock(segment).await;
        let segment = segment.to_string();
        self.run(move |s| s.create(&segment, policy)).await
    }

    async fn open_write(&self, segment: &str) -> Result<SegmentHandle> {
        let _guard = self.locks.lock(segment).await;
        let segment = segment.to_string();
        self.run(move |s| s.open_write(&segment)).await
    }

    async fn open_read(&self, segment: &str) -> Result<SegmentHandle> {
        let segment = segment.to_string();
        self.run(move |s| s.open_read(&segment)).await
    }

    async fn read(&self, handle: &SegmentHandle, offset: u64, length: usize) -> Result<Bytes> {
        let handle = handle.clone();
        self.run(move |s| s.read(&handle, offset, length)).await
    }

    #[instrument(skip(self, handle, data), fields(segment = %handle.segment_name, size = data.len()))]
    async fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> Result<()> {
        let _guard = self.locks.lock(&handle.segment_name).await;
        let handle = handle.clone();
        self.run(move |s| s.write(&handle, offset, data)).await
    }

    async fn get_info(&self, segment: &str) -> Result<SegmentProperties> {
        let segment = segment.to_string();
        self.run(move |s| s.get_info(&segment)).await
    }

    async fn exists(&self, segment: &str) -> Result<bool> {
        let segment = segment.to_string();
        self.run(move |s| s.exists(&segment)).await
    }

    async fn seal(&self, handle: &SegmentHandle) -> Result<()> {
        let _guard = self.locks.lock(&handle.segment_name).await;
        let handle = handle.clone();
        self.run(move |s| s.seal(&handle)).await
    }

    #[instrument(skip(self, target), fields(target = %target.segment_name))]
    async fn concat(&self, target: &SegmentHandle, offset: u64, source: &str) -> Result<()> {
        let _guards = self.locks.lock_pair(&target.segment_name, source).await;
        let target = target.clone();
        let source = source.to_string();
        self.run(move |s| s.concat(&target, offset, &source)).await
    }

    async fn delete(&self, handle: &SegmentHandle) -> Result<()> {
        let _guard = self.locks.lock(&handle.segment_name).await;
        let handle = handle.clone();
        self.run(move |s| s.delete(&handle)).await
    }

    async fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()> {
        let _guard = self.locks.lock(&handle.segment_name).await;
        let handle = handle.clone();
        self.run(move |s| s.truncate(&handle, offset)).await
    }

    fn supports_truncation(&self) -> bool {
        self.inner.supports_truncation()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for AsyncStorageWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStorageWrapper")
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChunkStorage;
    use crate::rolling::RollingStorage;
    use crate::StorageError;

    fn create_wrapper() -> AsyncStorageWrapper {
        let executor = ExecutionContext::current().unwrap();
        let rolling = RollingStorage::new(Arc::new(InMemoryChunkStorage::new()), executor.clone());
        AsyncStorageWrapper::new(Arc::new(rolling), executor)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_operations_delegate() {
        let storage = create_wrapper();
        let handle = storage
            .create("seg", SegmentRollingPolicy::new(8))
            .await
            .unwrap();
        storage.write(&handle, 0, Bytes::from("hello")).await.unwrap();

        assert!(storage.exists("seg").await.unwrap());
        assert_eq!(storage.get_info("seg").await.unwrap().length, 5);
        assert_eq!(
            storage.read(&handle, 1, 3).await.unwrap(),
            Bytes::from("ell")
        );
        assert!(storage.inner().as_any().downcast_ref::<RollingStorage>().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_errors_propagate() {
        let storage = create_wrapper();
        let result = storage.open_write("missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_different_segments() {
        let storage = Arc::new(create_wrapper());
        let mut tasks = Vec::new();
        for i in 0..4 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("seg-{}", i);
                let handle = storage
                    .create(&name, SegmentRollingPolicy::new(4))
                    .await
                    .unwrap();
                for j in 0..5u64 {
                    storage
                        .write(&handle, j * 2, Bytes::from("xy"))
                        .await
                        .unwrap();
                }
                storage.get_info(&name).await.unwrap().length
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 10);
        }
    }
}
