// src/core/channel/queue.rs

//! The destination (and source) queue (§4.8): a durable FIFO keyed by
//! `(channel, metadataId, msgId)`, backed by an in-memory buffer of capped
//! size with a check-out set enforcing per-item at-most-once concurrent
//! handoff within a process.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

/// One durable queue for a `(channel, metadataId)` pair. Generic over the
/// work item `T` (typically a message id, cheap to copy and re-fetch from
/// the store on refill).
pub struct DurableQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

struct Inner<T> {
    buffer: VecDeque<T>,
    checked_out: HashSet<T>,
}

impl<T> DurableQueue<T>
where
    T: Clone + Eq + std::hash::Hash + Send,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                checked_out: HashSet::new(),
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Adds an item to the tail, waking one waiter in `poll_with_timeout`.
    /// Returns `false` (drops nothing; the store remains the source of
    /// truth) if the in-memory buffer is already at capacity.
    pub async fn add(&self, item: T) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.buffer.len() >= self.capacity {
            return false;
        }
        inner.buffer.push_back(item);
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Re-queues a failed item at the head (default) or tail (`rotate`).
    pub async fn requeue(&self, item: T, rotate: bool) {
        let mut inner = self.inner.lock().await;
        inner.checked_out.remove(&item);
        if rotate {
            inner.buffer.push_back(item);
        } else {
            inner.buffer.push_front(item);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Returns the head item and marks it checked-out, or `None` if empty or
    /// the item at the head is already checked out (shouldn't happen under
    /// normal operation since `poll` removes from the buffer, but guards
    /// against a caller re-inserting a still-outstanding item).
    pub async fn poll(&self) -> Option<T> {
        let mut inner = self.inner.lock().await;
        let item = inner.buffer.pop_front()?;
        inner.checked_out.insert(item.clone());
        Some(item)
    }

    /// Waits up to `timeout` for an item, resolving immediately if one is
    /// already buffered. The caller must also race this against a stop
    /// signal (§5 "Cancellation"); this method alone does not observe one.
    pub async fn poll_with_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.poll().await {
            return Some(item);
        }
        let wait = self.notify.notified();
        tokio::select! {
            _ = wait => self.poll().await,
            _ = tokio::time::sleep(timeout) => None,
        }
    }

    /// Removes a completed item from the check-out set. Does not touch the
    /// buffer; `poll` already removed it from there.
    pub async fn finish(&self, item: &T) {
        self.inner.lock().await.checked_out.remove(item);
    }

    pub async fn depth(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    pub async fn is_checked_out(&self, item: &T) -> bool {
        self.inner.lock().await.checked_out.contains(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_returns_fifo_order_and_checks_out() {
        let queue: DurableQueue<i64> = DurableQueue::new(10);
        queue.add(1).await;
        queue.add(2).await;
        assert_eq!(queue.poll().await, Some(1));
        assert!(queue.is_checked_out(&1).await);
        queue.finish(&1).await;
        assert!(!queue.is_checked_out(&1).await);
        assert_eq!(queue.poll().await, Some(2));
    }

    #[tokio::test]
    async fn requeue_rotate_false_goes_to_head() {
        let queue: DurableQueue<i64> = DurableQueue::new(10);
        queue.add(1).await;
        queue.add(2).await;
        let item = queue.poll().await.unwrap();
        queue.requeue(item, false).await;
        assert_eq!(queue.poll().await, Some(1));
    }

    #[tokio::test]
    async fn requeue_rotate_true_goes_to_tail() {
        let queue: DurableQueue<i64> = DurableQueue::new(10);
        queue.add(1).await;
        queue.add(2).await;
        let item = queue.poll().await.unwrap();
        queue.requeue(item, true).await;
        assert_eq!(queue.poll().await, Some(2));
        assert_eq!(queue.poll().await, Some(1));
    }

    #[tokio::test]
    async fn add_rejects_when_at_capacity() {
        let queue: DurableQueue<i64> = DurableQueue::new(1);
        assert!(queue.add(1).await);
        assert!(!queue.add(2).await);
    }

    #[tokio::test]
    async fn poll_with_timeout_returns_none_on_empty_queue() {
        let queue: DurableQueue<i64> = DurableQueue::new(10);
        let result = queue.poll_with_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn poll_with_timeout_wakes_on_add() {
        use std::sync::Arc;
        let queue: Arc<DurableQueue<i64>> = Arc::new(DurableQueue::new(10));
        let q2 = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            q2.add(42).await;
        });
        let result = queue.poll_with_timeout(Duration::from_secs(1)).await;
        handle.await.unwrap();
        assert_eq!(result, Some(42));
    }
}
