//! # Stage queues.
//!
//! Every stage talks to its peers through a [`Queue`]:
//! - [`rendezvous`] zero-capacity handoff, used for all data queues. `send` completes only
//!   once a receiver has taken the item, so a slow consumer blocks its producers and the
//!   pressure travels upstream through every stage.
//! - [`bounded`] buffered queue, used for error streams (capacity 1) and completion
//!   signals (capacity = instance count).
//!
//! Queues are multi-producer / multi-consumer: all instances of a stage draw from the same
//! receiver, so item-to-instance assignment is competitive.
//!
//! ## Closing
//! ```text
//! Queue::close() ──► recv() on every receiver yields None
//!                └─► send() fails with QueueError::Closed (counted in rejected_sends)
//! ```
//! Only the owning stage closes a queue, exactly once, after every instance that may
//! write to it has signalled completion. `rejected_sends()` therefore stays at zero in a
//! correct shutdown.
//!
//! ## Handoff
//! ```text
//! send(item) ──► mpsc(1) ──► recv() takes envelope ──► ack ──► send returns Ok
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

struct Envelope<T> {
    item: T,
    ack: Option<oneshot::Sender<()>>,
}

struct Inner<T> {
    tx: mpsc::Sender<Envelope<T>>,
    rx: Mutex<mpsc::Receiver<Envelope<T>>>,
    closed: CancellationToken,
    closing: AtomicBool,
    rendezvous: bool,
    rejected: AtomicU64,
}

impl<T> Inner<T> {
    fn reject(&self) -> QueueError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        QueueError::Closed
    }
}

/// Owning handle of a queue; the only handle that can close it.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

/// Write handle.
pub struct QueueSender<T> {
    inner: Arc<Inner<T>>,
}

/// Read handle.
pub struct QueueReceiver<T> {
    inner: Arc<Inner<T>>,
}

/// Creates a zero-capacity handoff queue.
pub fn rendezvous<T>() -> Queue<T> {
    Queue::with_mode(1, true)
}

/// Creates a buffered queue holding up to `capacity` items (minimum 1).
pub fn bounded<T>(capacity: usize) -> Queue<T> {
    Queue::with_mode(capacity.max(1), false)
}

impl<T> Queue<T> {
    fn with_mode(capacity: usize, rendezvous: bool) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                closed: CancellationToken::new(),
                closing: AtomicBool::new(false),
                rendezvous,
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a new write handle.
    pub fn sender(&self) -> QueueSender<T> {
        QueueSender {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns a new read handle.
    pub fn receiver(&self) -> QueueReceiver<T> {
        QueueReceiver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Closes the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.closed.cancel();
        true
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Number of sends that failed because the queue was closed.
    pub fn rejected_sends(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }
}

impl<T> QueueSender<T> {
    /// Hands `item` to the queue.
    ///
    /// For a rendezvous queue this returns only after a receiver has taken the item.
    /// Cancel-safe in the sense that dropping the future never loses the queue's state;
    /// an item already handed to the channel may still be delivered.
    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        let inner = &*self.inner;
        if inner.closed.is_cancelled() {
            return Err(inner.reject());
        }

        let (ack, acked) = if inner.rendezvous {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        tokio::select! {
            biased;
            _ = inner.closed.cancelled() => return Err(inner.reject()),
            res = inner.tx.send(Envelope { item, ack }) => {
                if res.is_err() {
                    return Err(inner.reject());
                }
            }
        }

        match acked {
            None => Ok(()),
            Some(acked) => tokio::select! {
                biased;
                res = acked => res.map_err(|_| inner.reject()),
                _ = inner.closed.cancelled() => Err(inner.reject()),
            },
        }
    }

    /// Puts `item` into a buffered queue without waiting.
    ///
    /// Hands the item back when the queue is full, closed, or a rendezvous queue
    /// (which has no buffer to put it in).
    pub fn try_send(&self, item: T) -> Result<(), T> {
        let inner = &*self.inner;
        if inner.rendezvous {
            return Err(item);
        }
        if inner.closed.is_cancelled() {
            inner.reject();
            return Err(item);
        }
        inner
            .tx
            .try_send(Envelope { item, ack: None })
            .map_err(|e| e.into_inner().item)
    }

    /// True once the owning queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl<T> QueueReceiver<T> {
    /// Takes the next item, or `None` once the queue is closed.
    ///
    /// Cancel-safe: if the future is dropped before it completes, no item is lost.
    pub async fn recv(&self) -> Option<T> {
        let inner = &*self.inner;
        tokio::select! {
            biased;
            _ = inner.closed.cancelled() => None,
            env = async { inner.rx.lock().await.recv().await } => {
                let env = env?;
                if let Some(ack) = env.ack {
                    let _ = ack.send(());
                }
                Some(env.item)
            }
        }
    }

    /// True once the owning queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn rendezvous_send_waits_for_receiver() {
        let q = rendezvous::<u32>();
        let tx = q.sender();
        let rx = q.receiver();

        let pending = tokio::spawn(async move { tx.send(7).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished(), "send completed without a receiver");

        assert_eq!(rx.recv().await, Some(7));
        let res = timeout(Duration::from_secs(1), pending).await;
        assert!(matches!(res, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn close_releases_receivers_and_rejects_senders() {
        let q = rendezvous::<&'static str>();
        let rx = q.receiver();
        let waiting = tokio::spawn(async move { rx.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(q.close());
        assert!(!q.close(), "second close must be a no-op");

        let woke = timeout(Duration::from_secs(1), waiting).await;
        assert_eq!(woke.ok().and_then(Result::ok), Some(None));
        assert_eq!(q.sender().send("late").await, Err(QueueError::Closed));
        assert_eq!(q.rejected_sends(), 1);
    }

    #[tokio::test]
    async fn blocked_sender_is_released_by_close() {
        let q = rendezvous::<u8>();
        let tx = q.sender();
        let blocked = tokio::spawn(async move { tx.send(1).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let res = timeout(Duration::from_secs(1), blocked).await;
        assert!(matches!(res, Ok(Ok(Err(QueueError::Closed)))));
    }

    #[tokio::test]
    async fn bounded_buffers_without_receiver() {
        let q = bounded::<u8>(2);
        let tx = q.sender();
        tx.send(1).await.ok();
        tx.send(2).await.ok();

        let rx = q.receiver();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(q.rejected_sends(), 0);
    }

    #[tokio::test]
    async fn try_send_hands_item_back_when_full() {
        let q = bounded::<u8>(1);
        let tx = q.sender();
        assert_eq!(tx.try_send(1), Ok(()));
        assert_eq!(tx.try_send(2), Err(2));
        assert_eq!(rendezvous::<u8>().sender().try_send(3), Err(3));

        q.close();
        assert_eq!(tx.try_send(4), Err(4));
        assert_eq!(q.rejected_sends(), 1);
    }

    #[tokio::test]
    async fn receivers_compete_for_items() {
        let q = rendezvous::<u32>();
        let mut readers = Vec::new();
        for _ in 0..3 {
            let rx = q.receiver();
            readers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = rx.recv().await {
                    got.push(v);
                }
                got
            }));
        }

        let tx = q.sender();
        for i in 0..30 {
            tx.send(i).await.ok();
        }
        q.close();

        let mut all = Vec::new();
        for r in readers {
            all.extend(r.await.unwrap_or_default());
        }
        all.sort_unstable();
        assert_eq!(all, (0..30).collect::<Vec<_>>());
    }
}
