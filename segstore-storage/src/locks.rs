//! Per-segment operation sequencing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of async locks keyed by segment name.
///
/// Entries are dropped as soon as nobody holds or waits for them.
#[derive(Debug, Default)]
pub struct SegmentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive access to one segment; released on drop.
pub struct SegmentGuard<'a> {
    locks: &'a SegmentLocks,
    segment: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SegmentLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `segment`.
    pub async fn lock(&self, segment: &str) -> SegmentGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(segment.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        SegmentGuard {
            locks: self,
            segment: segment.to_string(),
            guard: Some(guard),
        }
    }

    /// Lock two segments in name order.
    pub async fn lock_pair(&self, a: &str, b: &str) -> (SegmentGuard<'_>, Option<SegmentGuard<'_>>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    /// Number of segments with a live lock entry.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock();
        if let Some(mutex) = locks.get(&self.segment) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(&self.segment);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entries_released() {
        let locks = SegmentLocks::new();
        {
            let _guard = locks.lock("seg").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_segment_is_serialized() {
        let locks = Arc::new(SegmentLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("seg").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_lock_pair_same_segment() {
        let locks = SegmentLocks::new();
        let (_first, second) = locks.lock_pair("a", "a").await;
        assert!(second.is_none());
    }
}
