//! Bounded alert queue between the ingestion loop and the alert workers
//!
//! Unlike a plain `mpsc` channel, a full queue applies an explicit policy:
//! evict the oldest pending alert, or wait up to a timeout and then drop the
//! new one. Every drop is counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use crate::config::{AlertsConfig, BackpressureKind};

/// Shutdown broadcast capacity; one signal is all that is ever sent
pub const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;

/// Shutdown broadcast: main -> all tasks
pub fn shutdown_channel() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(SHUTDOWN_CHANNEL_CAPACITY);
    tx
}

/// What to do when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    DropOldest,
    /// Wait for room, then drop the new item
    Block(Duration),
}

impl Backpressure {
    pub fn from_config(config: &AlertsConfig) -> Self {
        match config.backpressure {
            BackpressureKind::DropOldest => Backpressure::DropOldest,
            BackpressureKind::Block => Backpressure::Block(Duration::from_millis(config.block_timeout_ms)),
        }
    }
}

/// Result of a push
#[derive(Debug, PartialEq)]
pub enum PushOutcome<T> {
    Queued,
    /// Queued after evicting this older item
    EvictedOldest(T),
    /// Not queued: the wait timed out or the queue is closed
    Rejected(T),
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct AlertQueue<T> {
    inner: Mutex<QueueInner<T>>,
    capacity: usize,
    policy: Backpressure,
    not_empty: Notify,
    not_full: Notify,
    dropped: AtomicU64,
}

impl<T> AlertQueue<T> {
    pub fn new(capacity: usize, policy: Backpressure) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue according to the backpressure policy
    pub async fn push(&self, item: T) -> PushOutcome<T> {
        let wait = match self.policy {
            Backpressure::DropOldest => {
                return match self.try_push(item, true) {
                    Ok(outcome) => outcome,
                    Err(item) => PushOutcome::Rejected(item),
                }
            }
            Backpressure::Block(wait) => wait,
        };

        let deadline = tokio::time::Instant::now() + wait;
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item, false) {
                Ok(outcome) => return outcome,
                Err(back) => item = back,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Rejected(item);
            }
        }
    }

    /// Push without waiting. `Err` hands the item back when the queue is
    /// full and eviction is not allowed.
    fn try_push(&self, item: T, evict: bool) -> Result<PushOutcome<T>, T> {
        let mut inner = self.lock();
        if inner.closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(PushOutcome::Rejected(item));
        }

        let outcome = if inner.items.len() < self.capacity {
            PushOutcome::Queued
        } else if evict {
            match inner.items.pop_front() {
                Some(old) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::EvictedOldest(old)
                }
                None => PushOutcome::Queued,
            }
        } else {
            return Err(item);
        };

        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(outcome)
    }

    /// Next item; `None` once the queue is closed and drained
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Refuse new items; pending items can still be popped
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items dropped by backpressure or refused after close
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = AlertQueue::new(4, Backpressure::DropOldest);
        for i in 0..3 {
            assert_eq!(queue.push(i).await, PushOutcome::Queued);
        }
        assert_eq!(queue.pop().await, Some(0));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let queue = AlertQueue::new(2, Backpressure::DropOldest);
        queue.push("a").await;
        queue.push("b").await;
        assert_eq!(queue.push("c").await, PushOutcome::EvictedOldest("a"));
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.pop().await, Some("b"));
        assert_eq!(queue.pop().await, Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_times_out_and_drops_new_item() {
        let queue = AlertQueue::new(1, Backpressure::Block(Duration::from_millis(100)));
        queue.push(1).await;
        assert_eq!(queue.push(2).await, PushOutcome::Rejected(2));
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.pop().await, Some(1));
    }

    #[tokio::test]
    async fn test_block_resumes_when_room_frees() {
        let queue = Arc::new(AlertQueue::new(1, Backpressure::Block(Duration::from_secs(5))));
        queue.push(1).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.pop().await, Some(1));

        assert_eq!(producer.await.unwrap(), PushOutcome::Queued);
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = Arc::new(AlertQueue::new(4, Backpressure::DropOldest));
        queue.push(7).await;
        queue.close();

        assert_eq!(queue.push(8).await, PushOutcome::Rejected(8));
        assert_eq!(queue.pop().await, Some(7));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumers() {
        let queue: Arc<AlertQueue<u32>> = Arc::new(AlertQueue::new(4, Backpressure::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let tx = shutdown_channel();
        let mut rx = tx.subscribe();
        assert!(tx.send(()).is_ok());
        assert!(rx.recv().await.is_ok());
    }
}
