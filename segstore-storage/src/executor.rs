//! Caller-owned execution context.
//!
//! Wraps a tokio runtime [`Handle`]. Storage adapters submit their work
//! through it; the runtime itself is created and shut down by the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{Result, StorageError};

/// Task-execution facility shared by everything a factory builds.
#[derive(Clone)]
pub struct ExecutionContext {
    handle: Handle,
    blocking_permits: Option<Arc<Semaphore>>,
}

impl ExecutionContext {
    /// Create a context on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            blocking_permits: None,
        }
    }

    /// Create a context on the runtime of the calling thread.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| StorageError::Config(format!("No tokio runtime available: {}", e)))
    }

    /// Bound the number of blocking tasks running at once.
    pub fn with_max_blocking(mut self, max: usize) -> Self {
        self.blocking_permits = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn an async task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run blocking work on the runtime's blocking pool and await its result.
    pub async fn run_blocking<F, R>(&self, work: F) -> Result<R>
    where
        F: FnOnce() -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let permit = match &self.blocking_permits {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| StorageError::Backend("Execution context closed".to_string()))?,
            ),
            None => None,
        };

        self.handle
            .spawn_blocking(move || {
                let _permit = permit;
                work()
            })
            .await
            .map_err(|e| StorageError::Backend(format!("Blocking task failed: {}", e)))?
    }

    /// Drive a future to completion from a synchronous caller.
    ///
    /// Works from plain threads and from inside a runtime. In the latter
    /// case the future is driven from a scoped helper thread, because tokio
    /// refuses to block a thread that is already running a runtime. On a
    /// current-thread runtime such futures cannot rely on its timers or I/O.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        if Handle::try_current().is_err() {
            return self.handle.block_on(future);
        }
        let handle = &self.handle;
        std::thread::scope(|scope| {
            scope
                .spawn(move || handle.block_on(future))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("runtime_flavor", &self.handle.runtime_flavor())
            .field(
                "available_blocking",
                &self.blocking_permits.as_ref().map(|s| s.available_permits()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_without_runtime() {
        let result = ExecutionContext::current();
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn test_block_on_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let executor = ExecutionContext::new(runtime.handle().clone());
        let value = executor.block_on(async { 40 + 2 });
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_runtime() {
        let executor = ExecutionContext::current().unwrap();
        let value = executor.block_on(async {
            tokio::task::yield_now().await;
            "done"
        });
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn test_block_on_inside_current_thread_runtime() {
        let executor = ExecutionContext::current().unwrap();
        assert_eq!(executor.block_on(async { 6 * 7 }), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_blocking_propagates_errors() {
        let executor = ExecutionContext::current().unwrap().with_max_blocking(1);

        let ok = executor.run_blocking(|| Ok(7)).await.unwrap();
        assert_eq!(ok, 7);

        let err = executor
            .run_blocking::<_, ()>(|| Err(StorageError::NotFound("seg".to_string())))
            .await;
        assert!(matches!(err, Err(StorageError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_on_inside_blocking_pool() {
        let executor = ExecutionContext::current().unwrap();
        let inner = executor.clone();
        let value = executor
            .run_blocking(move || Ok(inner.block_on(async { "done" })))
            .await
            .unwrap();
        assert_eq!(value, "done");
    }
}
