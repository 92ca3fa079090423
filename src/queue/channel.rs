use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Creates a bounded multi-producer, multi-consumer stage queue.
///
/// Architecture:
/// 1. Producers call `StageSender::send`, which waits while the queue is full
///    (backpressure on the upstream stage)
/// 2. Every worker of the consuming stage holds a clone of the
///    `StageReceiver`; whichever worker is idle takes the next item
/// 3. The queue closes once every sender clone is dropped and the buffered
///    items are drained, so `recv` returning `None` means "no more work"
pub fn bounded<T>(name: &'static str, capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    debug!(queue = name, capacity, "Created stage queue");
    (
        StageSender { name, inner: tx },
        StageReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Returned when the consuming side of a queue is gone; carries the item back.
pub struct SendError<T> {
    pub queue: &'static str,
    pub item: T,
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").field("queue", &self.queue).finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage queue '{}' is closed", self.queue)
    }
}

impl<T> std::error::Error for SendError<T> {}

pub struct StageSender<T> {
    name: &'static str,
    inner: mpsc::Sender<T>,
}

impl<T> Clone for StageSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
        }
    }
}

impl<T> StageSender<T> {
    /// Enqueue an item, waiting for capacity.
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.inner.send(item).await.map_err(|err| SendError {
            queue: self.name,
            item: err.0,
        })
    }
}

pub struct StageReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for StageReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StageReceiver<T> {
    /// Take the next item, or `None` once the queue is closed and empty.
    ///
    /// The lock is only held while waiting for one item, so idle workers
    /// queue up fairly behind each other.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_items_delivered_in_order() {
        let (tx, rx) = bounded("test", 4);
        for i in 0..3 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        assert_eq!(rx.recv().await, Some(0));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_sender() {
        let (tx, rx) = bounded("test", 1);
        tx.send(1).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(2)).await;
        assert!(blocked.is_err(), "second send should wait for capacity");

        assert_eq!(rx.recv().await, Some(1));
        tokio::time::timeout(Duration::from_millis(50), tx.send(3))
            .await
            .expect("capacity freed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shared_receiver_spreads_work() {
        let (tx, rx) = bounded("test", 16);
        for i in 0..10u32 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let mut workers = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let rx = rx.clone();
            workers.spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = rx.recv().await {
                    seen.push(item);
                }
                seen
            });
        }

        let mut all = Vec::new();
        while let Some(seen) = workers.join_next().await {
            all.extend(seen.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_after_receivers_dropped() {
        let (tx, rx) = bounded("orphan", 1);
        drop(rx);

        let err = tx.send(7).await.unwrap_err();
        assert_eq!(err.item, 7);
        assert_eq!(err.queue, "orphan");
    }
}
