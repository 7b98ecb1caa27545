//! Bounded uplink queue with head-drop overflow.
//!
//! The ingestion task produces serialized reading payloads, the uplink task
//! consumes them. Capacity is three packages; when a fourth arrives the
//! oldest is evicted so the freshest readings survive backpressure.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Capacity of the uplink queue in packages.
pub const QUEUE_CAPACITY: usize = 3;
/// Upper bound on one serialized payload.
pub const MAX_PACKAGE_SIZE: usize = 2048;

/// One queued uplink payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPackage {
    /// Serialized token payload (JSON text).
    pub payload: String,
    /// Enqueue time in milliseconds since boot.
    pub enqueued_at: u64,
}

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The payload exceeds [`MAX_PACKAGE_SIZE`].
    Oversize,
}

/// Single-producer single-consumer bounded queue.
#[derive(Debug, Default)]
pub struct ReadingQueue {
    items: Mutex<VecDeque<DataPackage>>,
    notify: Notify,
}

impl ReadingQueue {
    pub fn new() -> Self {
        ReadingQueue::default()
    }

    /// Enqueue a package, evicting the oldest when full.
    ///
    /// Returns the evicted package, if any.
    pub fn push(&self, package: DataPackage) -> Result<Option<DataPackage>, PushError> {
        if package.payload.len() > MAX_PACKAGE_SIZE {
            return Err(PushError::Oversize);
        }

        let evicted = {
            let mut items = self.items.lock().unwrap();
            let evicted = if items.len() >= QUEUE_CAPACITY {
                items.pop_front()
            } else {
                None
            };
            items.push_back(package);
            evicted
        };
        self.notify.notify_one();
        Ok(evicted)
    }

    /// Dequeue the oldest package without waiting.
    pub fn try_pop(&self) -> Option<DataPackage> {
        self.items.lock().unwrap().pop_front()
    }

    /// Dequeue the oldest package, waiting up to `timeout` for one to
    /// arrive. The uplink task uses this as its blocking point.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<DataPackage> {
        if let Some(pkg) = self.try_pop() {
            return Some(pkg);
        }
        match tokio::time::timeout(timeout, self.notify.notified()).await {
            Ok(()) => self.try_pop(),
            Err(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(tag: &str) -> DataPackage {
        DataPackage {
            payload: tag.to_owned(),
            enqueued_at: 0,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = ReadingQueue::new();
        q.push(pkg("r1")).unwrap();
        q.push(pkg("r2")).unwrap();
        assert_eq!(q.try_pop().unwrap().payload, "r1");
        assert_eq!(q.try_pop().unwrap().payload, "r2");
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let q = ReadingQueue::new();
        for tag in ["r1", "r2", "r3"] {
            assert!(q.push(pkg(tag)).unwrap().is_none());
        }
        // Fourth push evicts r1; drain yields r2, r3, r4.
        let evicted = q.push(pkg("r4")).unwrap().expect("oldest evicted");
        assert_eq!(evicted.payload, "r1");

        let drained: Vec<String> = std::iter::from_fn(|| q.try_pop().map(|p| p.payload)).collect();
        assert_eq!(drained, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn oversize_payload_is_refused() {
        let q = ReadingQueue::new();
        let big = DataPackage {
            payload: "x".repeat(MAX_PACKAGE_SIZE + 1),
            enqueued_at: 0,
        };
        assert_eq!(q.push(big), Err(PushError::Oversize));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn pop_timeout_wakes_on_push() {
        let q = std::sync::Arc::new(ReadingQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop_timeout(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(pkg("late")).unwrap();
        let got = waiter.await.unwrap().expect("package delivered");
        assert_eq!(got.payload, "late");
    }

    #[tokio::test]
    async fn pop_timeout_expires_empty() {
        let q = ReadingQueue::new();
        assert!(q.pop_timeout(Duration::from_millis(10)).await.is_none());
    }
}
