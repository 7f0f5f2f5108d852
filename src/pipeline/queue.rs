//! In-memory bounded FIFO shared between a producer and a consumer stage
//!
//! Used for both pipeline queues:
//! - Queue A: `WorkQueue<RawEvent>` (replay → enrichment), popped without blocking
//! - Queue B: `WorkQueue<Vec<EnrichedEvent>>` (enrichment → aggregation), popped with a bounded wait
//!
//! Locking stays internal; callers only see push / pop / len.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    item_pushed: Notify,
    space_freed: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            item_pushed: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail, waiting for space while the queue is full
    pub async fn push(&self, item: T) {
        let mut item = Some(item);
        loop {
            let freed = self.space_freed.notified();
            {
                let mut items = self.lock();
                if items.len() < self.capacity {
                    if let Some(item) = item.take() {
                        items.push_back(item);
                    }
                    break;
                }
            }
            freed.await;
        }
        self.item_pushed.notify_waiters();
    }

    /// Append to the tail, handing the item back if the queue is full
    pub fn try_push(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.item_pushed.notify_waiters();
        Ok(())
    }

    /// Head of the queue, or `None` immediately when empty
    pub fn try_pop(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.space_freed.notify_waiters();
        }
        item
    }

    /// Up to `max` items from the head without waiting
    pub fn drain_up_to(&self, max: usize) -> Vec<T> {
        let drained: Vec<T> = {
            let mut items = self.lock();
            let take = max.min(items.len());
            items.drain(..take).collect()
        };
        if !drained.is_empty() {
            self.space_freed.notify_waiters();
        }
        drained
    }

    /// Head of the queue, waiting at most `timeout` for one to arrive
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let pushed = self.item_pushed.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything queued, returning how many items were discarded
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut items = self.lock();
            let n = items.len();
            items.clear();
            n
        };
        if dropped > 0 {
            self.space_freed.notify_waiters();
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order_and_size() {
        let queue = WorkQueue::new(10);
        assert!(queue.try_push(1).is_ok());
        assert!(queue.try_push(2).is_ok());
        assert!(queue.try_push(3).is_ok());
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_push_rejects_when_full() {
        let queue = WorkQueue::new(2);
        queue.try_push("a").unwrap();
        queue.try_push("b").unwrap();
        assert_eq!(queue.try_push("c"), Err("c"));
    }

    #[test]
    fn test_drain_up_to_takes_head() {
        let queue = WorkQueue::new(100);
        for i in 0..10 {
            queue.try_push(i).unwrap();
        }
        assert_eq!(queue.drain_up_to(4), vec![0, 1, 2, 3]);
        assert_eq!(queue.len(), 6);
        assert_eq!(queue.drain_up_to(50).len(), 6);
        assert!(queue.drain_up_to(5).is_empty());
    }

    #[tokio::test]
    async fn test_pop_timeout_returns_none_when_idle() {
        let queue: WorkQueue<u32> = WorkQueue::new(4);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(50)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new(4));
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(7u32).await;
        });

        let item = queue.pop_timeout(Duration::from_secs(2)).await;
        assert_eq!(item, Some(7));
    }

    #[tokio::test]
    async fn test_push_waits_for_space() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.push(1u32).await;

        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            producer.push(2).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some(1));

        handle.await.unwrap();
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = WorkQueue::new(8);
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
